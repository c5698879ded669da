//! The checkpoint ledger: durable proof of completed work.
//!
//! One marker per (stage, optional shard) records that the unit finished
//! successfully. Markers are monotonic — once written they are never
//! deleted or re-evaluated within a run — and existence is the only fact
//! the orchestrator consults. A unit is either fully done (marker present)
//! or redone from scratch on the next invocation; there is no partial
//! success.
//!
//! The filesystem backing is a deliberate "filesystem as database"
//! shape: one empty file per marker, state reconstructed by existence
//! checks. `mark` uses create-if-absent file
//! creation, so two shards completing at the same instant cannot corrupt
//! or lose either marker.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::stage::StageId;

/// Identity of one unit of work: a stage, plus the shard ordinal for
/// sharded stages.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CheckpointKey {
    stage: &'static str,
    shard: Option<usize>,
}

impl CheckpointKey {
    /// Key for a monolithic stage, or for a sharded stage's whole-stage
    /// completion marker.
    pub fn stage(stage: StageId) -> Self {
        Self {
            stage: stage.name(),
            shard: None,
        }
    }

    /// Key for one shard of a sharded stage.
    pub fn shard(stage: StageId, index: usize) -> Self {
        Self {
            stage: stage.name(),
            shard: Some(index),
        }
    }

    /// Marker file name under the checkpoint directory.
    pub fn file_name(&self) -> String {
        match self.shard {
            None => self.stage.to_string(),
            Some(i) => format!("{}.part_{}", self.stage, i),
        }
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.shard {
            None => f.write_str(self.stage),
            Some(i) => write!(f, "{} (shard {})", self.stage, i),
        }
    }
}

/// Key-existence store for completion markers. Filesystem today; the
/// trait keeps the backing swappable.
pub trait CheckpointStore: Send + Sync {
    fn exists(&self, key: &CheckpointKey) -> Result<bool>;

    /// Record completion. Idempotent and safe to race: concurrent marks of
    /// the same or different keys must all succeed without loss.
    fn mark(&self, key: &CheckpointKey) -> Result<()>;
}

/// Marker files under `<output dir>/.checkpoint/`.
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    /// Open (creating if needed) the ledger directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create checkpoint dir {}", dir.display()))?;
        Ok(Self { dir })
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn exists(&self, key: &CheckpointKey) -> Result<bool> {
        Ok(self.dir.join(key.file_name()).exists())
    }

    fn mark(&self, key: &CheckpointKey) -> Result<()> {
        let path = self.dir.join(key.file_name());
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(()),
            // Already marked by an earlier run or a racing sibling.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("failed to write checkpoint marker {}", path.display())
            }),
        }
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    keys: Mutex<HashSet<CheckpointKey>>,
}

impl CheckpointStore for MemoryCheckpointStore {
    fn exists(&self, key: &CheckpointKey) -> Result<bool> {
        Ok(self.keys.lock().unwrap().contains(key))
    }

    fn mark(&self, key: &CheckpointKey) -> Result<()> {
        self.keys.lock().unwrap().insert(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn marker_file_names_are_stable() {
        assert_eq!(CheckpointKey::stage(StageId::Merge).file_name(), "merge");
        assert_eq!(
            CheckpointKey::shard(StageId::GeneToReaction, 3).file_name(),
            "gene_to_reaction.part_3"
        );
    }

    #[test]
    fn mark_then_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::open(tmp.path().join(".checkpoint")).unwrap();
        let key = CheckpointKey::shard(StageId::Score, 0);

        assert!(!store.exists(&key).unwrap());
        store.mark(&key).unwrap();
        assert!(store.exists(&key).unwrap());
        // Stage-level key is distinct from the shard key.
        assert!(!store.exists(&CheckpointKey::stage(StageId::Score)).unwrap());
    }

    #[test]
    fn mark_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::open(tmp.path()).unwrap();
        let key = CheckpointKey::stage(StageId::Split);
        store.mark(&key).unwrap();
        store.mark(&key).unwrap();
        assert!(store.exists(&key).unwrap());
    }

    #[test]
    fn concurrent_marks_never_lose_a_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FsCheckpointStore::open(tmp.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                // Half the threads race on the same shard key.
                let key = CheckpointKey::shard(StageId::CompoundToReaction, i % 4);
                store.mark(&key).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..4 {
            let key = CheckpointKey::shard(StageId::CompoundToReaction, i);
            assert!(store.exists(&key).unwrap());
        }
    }

    #[test]
    fn stores_with_different_dirs_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let a = FsCheckpointStore::open(tmp.path().join("run_a")).unwrap();
        let b = FsCheckpointStore::open(tmp.path().join("run_b")).unwrap();
        let key = CheckpointKey::stage(StageId::Filter);
        a.mark(&key).unwrap();
        assert!(a.exists(&key).unwrap());
        assert!(!b.exists(&key).unwrap());
    }
}
