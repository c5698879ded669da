//! Shard identity and the split manifest.
//!
//! A shard is one partition of the compound table, identified by ordinal
//! for the lifetime of the run. Everything a shard produces lives in paths
//! derived from its own file path (a per-shard suffix), so shards never
//! write into each other's space.
//!
//! The manifest records the shard paths in stable order plus a fingerprint
//! of the table that was split. On resume the fingerprint is checked
//! against the current input, which turns "same input, same K, same
//! boundaries" from an assumption into a verified fact.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::merge::ResultKind;
use crate::stage::StageId;

/// One partition of the compound table.
#[derive(Clone, Debug)]
pub struct Shard {
    /// Ordinal index; shards are referenced by it for the whole run.
    pub index: usize,
    /// The shard's part file, header included.
    pub path: PathBuf,
}

impl Shard {
    /// Directory the shard's stages write their outputs into.
    pub fn output_dir(&self) -> PathBuf {
        append_suffix(&self.path, ".out")
    }

    /// Log file for one stage's work on this shard. Deterministic, so a
    /// rerun overwrites the stale log of a failed attempt.
    pub fn log_path(&self, stage: StageId) -> PathBuf {
        append_suffix(&self.path, &format!(".{}.log", stage.name()))
    }

    /// Per-shard result table of one kind, as written by the scoring stage.
    pub fn result_table(&self, kind: ResultKind) -> PathBuf {
        self.output_dir().join(kind.file_name())
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Ordered list of shards plus the fingerprint of the split input.
#[derive(Clone, Debug)]
pub struct Manifest {
    pub shards: Vec<Shard>,
    /// Hex sha256 of the table that was split.
    pub input_digest: String,
}

impl Manifest {
    pub fn new(paths: Vec<PathBuf>, input_digest: String) -> Self {
        let shards = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| Shard { index, path })
            .collect();
        Self {
            shards,
            input_digest,
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Write the manifest: comment header, then one shard path per line in
    /// shard order.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("# magi shard manifest\n");
        out.push_str(&format!("# created={}\n", chrono::Utc::now().to_rfc3339()));
        out.push_str(&format!("# input_sha256={}\n", self.input_digest));
        out.push_str(&format!("# shards={}\n", self.shards.len()));
        for shard in &self.shards {
            out.push_str(&shard.path.to_string_lossy());
            out.push('\n');
        }
        std::fs::write(path, out)
            .with_context(|| format!("failed to write shard manifest {}", path.display()))
    }

    /// Load a manifest written by [`Manifest::write`]. A manifest listing
    /// zero shards is malformed and rejected here, before any work is
    /// dispatched against it.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open shard manifest {}", path.display()))?;
        let mut paths = Vec::new();
        let mut input_digest = String::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('#') {
                if let Some(digest) = rest.trim().strip_prefix("input_sha256=") {
                    input_digest = digest.trim().to_string();
                }
                continue;
            }
            paths.push(PathBuf::from(line));
        }
        if paths.is_empty() {
            anyhow::bail!("shard manifest {} lists no shards", path.display());
        }
        Ok(Manifest::new(paths, input_digest))
    }
}

/// Hex sha256 of a file's contents, streamed.
pub fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
