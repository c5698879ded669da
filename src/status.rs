//! Read-only run inspection for `magi status`.
//!
//! Reconstructs where a run stands purely from the checkpoint ledger and
//! the shard manifest; nothing here mutates the output directory, so it is
//! safe to point at a run that is still executing.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::checkpoint::CheckpointKey;
use crate::stage::StageId;

/// Where one stage of a run stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageState {
    /// Stage marker present.
    Done,
    /// Sharded stage with some, but not all, shard markers.
    Partial { done: usize, total: usize },
    /// No marker yet.
    Pending,
}

/// Compute the per-stage state of the run under `output_dir`.
pub fn stage_states(output_dir: &Path) -> Result<Vec<(StageId, StageState)>> {
    let ledger = output_dir.join(".checkpoint");
    if !ledger.is_dir() {
        anyhow::bail!(
            "{} holds no run (no checkpoint ledger found)",
            output_dir.display()
        );
    }
    let shard_total = manifest_shard_count(output_dir)?;

    let marked = |key: &CheckpointKey| ledger.join(key.file_name()).exists();
    let mut states = Vec::with_capacity(StageId::SEQUENCE.len());
    for stage in StageId::SEQUENCE {
        let state = if marked(&CheckpointKey::stage(stage)) {
            StageState::Done
        } else if stage.is_sharded() {
            match shard_total {
                Some(total) => {
                    let done = (0..total)
                        .filter(|i| marked(&CheckpointKey::shard(stage, *i)))
                        .count();
                    if done > 0 {
                        StageState::Partial { done, total }
                    } else {
                        StageState::Pending
                    }
                }
                None => StageState::Pending,
            }
        } else {
            StageState::Pending
        };
        states.push((stage, state));
    }
    Ok(states)
}

/// Print the status table for one run.
pub fn run_status(output_dir: &Path) -> Result<()> {
    let states = stage_states(output_dir)?;
    println!("run: {}", output_dir.display());
    for (stage, state) in states {
        let label = match state {
            StageState::Done => "done".to_string(),
            StageState::Partial { done, total } => format!("{} / {} shards", done, total),
            StageState::Pending => "pending".to_string(),
        };
        println!("  {:<22} {}", stage.name(), label);
    }
    Ok(())
}

fn manifest_shard_count(output_dir: &Path) -> Result<Option<usize>> {
    let path: PathBuf = output_dir.join("intermediate").join("shards.manifest");
    if !path.exists() {
        return Ok(None);
    }
    let manifest = crate::shard::Manifest::load(&path)
        .with_context(|| format!("failed to read shard manifest {}", path.display()))?;
    Ok(Some(manifest.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStore, FsCheckpointStore};

    fn write_manifest(out: &Path, shards: usize) {
        let dir = out.join("intermediate");
        std::fs::create_dir_all(&dir).unwrap();
        let paths = (0..shards)
            .map(|i| dir.join(format!("c.part_{}.csv", i)))
            .collect();
        crate::shard::Manifest::new(paths, String::new())
            .write(&dir.join("shards.manifest"))
            .unwrap();
    }

    #[test]
    fn missing_ledger_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(stage_states(tmp.path()).is_err());
    }

    #[test]
    fn states_reflect_markers_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path();
        write_manifest(out, 3);
        let store = FsCheckpointStore::open(out.join(".checkpoint")).unwrap();
        store.mark(&CheckpointKey::stage(StageId::Split)).unwrap();
        store
            .mark(&CheckpointKey::stage(StageId::CompoundToReaction))
            .unwrap();
        store
            .mark(&CheckpointKey::shard(StageId::GeneToReaction, 0))
            .unwrap();
        store
            .mark(&CheckpointKey::shard(StageId::GeneToReaction, 2))
            .unwrap();

        let states = stage_states(out).unwrap();
        let get = |stage: StageId| {
            states
                .iter()
                .find(|(s, _)| *s == stage)
                .map(|(_, state)| *state)
                .unwrap()
        };
        assert_eq!(get(StageId::Split), StageState::Done);
        assert_eq!(get(StageId::CompoundToReaction), StageState::Done);
        assert_eq!(
            get(StageId::GeneToReaction),
            StageState::Partial { done: 2, total: 3 }
        );
        assert_eq!(get(StageId::Score), StageState::Pending);
        assert_eq!(get(StageId::Merge), StageState::Pending);
    }

    #[test]
    fn fresh_ledger_shows_everything_pending() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".checkpoint")).unwrap();
        let states = stage_states(tmp.path()).unwrap();
        assert!(states.iter().all(|(_, s)| *s == StageState::Pending));
    }
}
