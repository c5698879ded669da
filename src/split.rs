//! Deterministic round-robin table splitter.
//!
//! Partitions a header-bearing row file into K part files, each a valid
//! table in its own right: the header is copied into every part and data
//! row i goes to part `i % K`. Round-robin rather than contiguous blocks
//! keeps per-shard compute balanced when row cost is uneven — the
//! downstream searches dominate the run and a block of expensive compounds
//! would otherwise pile onto one shard.
//!
//! Zero-row policy: a header-only input still succeeds and produces K
//! header-only parts, so every downstream stage sees a valid (empty)
//! table and the merge degenerates to a header-only result.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{RunContext, Sharding};
use crate::shard::{file_sha256, Manifest};

/// Resolve the shard count. Always at least 1.
pub fn shard_count(data_rows: usize, sharding: Sharding) -> usize {
    match sharding {
        Sharding::Count(k) => k.max(1),
        Sharding::MaxRows(max_rows) => data_rows / max_rows.max(1) + 1,
    }
}

/// Split `input` into `k` part files under `parts_dir`, returning their
/// paths in shard order. No data row is dropped or duplicated.
pub fn split_table(input: &Path, parts_dir: &Path, k: usize) -> Result<Vec<PathBuf>> {
    assert!(k >= 1, "shard count must be at least 1");
    std::fs::create_dir_all(parts_dir)
        .with_context(|| format!("failed to create parts dir {}", parts_dir.display()))?;

    let file = File::open(input)
        .with_context(|| format!("failed to open split input {}", input.display()))?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line.with_context(|| format!("failed to read {}", input.display()))?,
        None => anyhow::bail!("split input {} is empty (no header line)", input.display()),
    };

    let mut paths = Vec::with_capacity(k);
    let mut writers = Vec::with_capacity(k);
    for i in 0..k {
        let path = parts_dir.join(part_file_name(input, i));
        let part = File::create(&path)
            .with_context(|| format!("failed to create shard file {}", path.display()))?;
        let mut writer = BufWriter::new(part);
        writeln!(writer, "{}", header)
            .with_context(|| format!("failed to write {}", path.display()))?;
        paths.push(path);
        writers.push(writer);
    }

    for (row, line) in lines.enumerate() {
        let line = line.with_context(|| format!("failed to read {}", input.display()))?;
        let part = row % k;
        writeln!(writers[part], "{}", line)
            .with_context(|| format!("failed to write {}", paths[part].display()))?;
    }
    for (writer, path) in writers.into_iter().zip(&paths) {
        let part = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush {}: {}", path.display(), e))?;
        part.sync_all()
            .with_context(|| format!("failed to flush {}", path.display()))?;
    }
    Ok(paths)
}

/// Run the split stage for one pipeline invocation: fingerprint the input,
/// resolve K, write the part files and persist the manifest.
pub fn run_split(run: &RunContext) -> Result<Manifest> {
    let input = run.split_input();
    let digest = file_sha256(&input)?;
    let k = shard_count(count_data_rows(&input)?, run.sharding);

    let paths = split_table(&input, &run.parts_dir(), k)?;
    let manifest = Manifest::new(paths, digest);
    manifest.write(&run.manifest_path())?;
    println!(
        "split {} into {} shard(s), manifest at {}",
        input.display(),
        manifest.len(),
        run.manifest_path().display()
    );
    Ok(manifest)
}

/// Check that a manifest from a previous invocation still matches the
/// split input. The sharded stages diff their per-shard checkpoints
/// against the manifest, which is only sound if the shard boundaries are
/// the ones the markers were written against.
pub fn verify_manifest_input(run: &RunContext, manifest: &Manifest) -> Result<()> {
    if manifest.input_digest.is_empty() {
        return Ok(()); // manifest predates fingerprinting
    }
    let input = run.split_input();
    let current = file_sha256(&input)?;
    if current != manifest.input_digest {
        anyhow::bail!(
            "{} changed since the shard manifest was written; \
             resume requires the original input (or a fresh output directory)",
            input.display()
        );
    }
    Ok(())
}

fn count_data_rows(input: &Path) -> Result<usize> {
    let file = File::open(input)
        .with_context(|| format!("failed to open split input {}", input.display()))?;
    let lines = BufReader::new(file).lines().count();
    Ok(lines.saturating_sub(1))
}

fn part_file_name(input: &Path, index: usize) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    format!("{}.part_{}.{}", stem, index, ext)
}
