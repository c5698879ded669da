//! Whole-run result merging.
//!
//! The scoring stage leaves three result tables in every shard's output
//! directory. The merger concatenates each kind across shards in manifest
//! order: one header line taken from the first shard, then every data row
//! from every shard. A row that is itself a repeated header — recognised
//! by the header's first-column sentinel value — is dropped, so the merged
//! table reproduces the row set of a hypothetical unsharded run
//! regardless of shard count. Rows are otherwise treated as opaque text.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::RunContext;
use crate::shard::Manifest;

/// The three result tables the scoring stage produces per shard.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultKind {
    /// Full association table, one row per gene-compound-reaction link.
    Whole,
    /// Best row per gene.
    GeneCentric,
    /// Best row per input compound.
    CompoundCentric,
}

impl ResultKind {
    pub const ALL: [ResultKind; 3] = [
        ResultKind::Whole,
        ResultKind::GeneCentric,
        ResultKind::CompoundCentric,
    ];

    /// File name inside a shard output directory, and the suffix of the
    /// whole-run merged table.
    pub fn file_name(self) -> &'static str {
        match self {
            ResultKind::Whole => "magi_results.csv",
            ResultKind::GeneCentric => "magi_gene_results.csv",
            ResultKind::CompoundCentric => "magi_compound_results.csv",
        }
    }

    /// Suffix of the filtered variant.
    pub fn filtered_file_name(self) -> &'static str {
        match self {
            ResultKind::Whole => "magi_results.filtered.csv",
            ResultKind::GeneCentric => "magi_gene_results.filtered.csv",
            ResultKind::CompoundCentric => "magi_compound_results.filtered.csv",
        }
    }
}

/// Merge one result kind across all shards into `out_path`.
pub fn merge_tables(manifest: &Manifest, kind: ResultKind, out_path: &Path) -> Result<u64> {
    let out = File::create(out_path)
        .with_context(|| format!("failed to create merged table {}", out_path.display()))?;
    let mut writer = BufWriter::new(out);

    let mut header: Option<String> = None;
    let mut rows: u64 = 0;

    for shard in &manifest.shards {
        let path = shard.result_table(kind);
        let file = File::open(&path).with_context(|| {
            format!(
                "missing result table {} (shard {} did not produce it)",
                path.display(),
                shard.index
            )
        })?;
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            match &header {
                None => {
                    writeln!(writer, "{}", line)
                        .with_context(|| format!("failed to write {}", out_path.display()))?;
                    header = Some(line);
                }
                Some(h) => {
                    if first_column(&line) == first_column(h) {
                        continue; // repeated header from a later shard
                    }
                    writeln!(writer, "{}", line)
                        .with_context(|| format!("failed to write {}", out_path.display()))?;
                    rows += 1;
                }
            }
        }
    }

    if header.is_none() {
        anyhow::bail!(
            "no header found in any shard's {} table",
            kind.file_name()
        );
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", out_path.display()))?;
    Ok(rows)
}

/// Run the merge stage: all three result kinds, in manifest order.
pub fn run_merge(run: &RunContext, manifest: &Manifest) -> Result<()> {
    for kind in ResultKind::ALL {
        let out_path = run.merged_table(kind);
        let rows = merge_tables(manifest, kind, &out_path)?;
        println!(
            "merged {} rows from {} shard(s) into {}",
            rows,
            manifest.len(),
            out_path.display()
        );
    }
    Ok(())
}

fn first_column(line: &str) -> &str {
    line.split(',').next().unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn shard_with_table(dir: &Path, index: usize, content: &str) -> PathBuf {
        let part = dir.join(format!("compounds.part_{}.csv", index));
        std::fs::write(&part, "original_compound\n").unwrap();
        let out_dir = dir.join(format!("compounds.part_{}.csv.out", index));
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join(ResultKind::Whole.file_name()), content).unwrap();
        part
    }

    #[test]
    fn merge_keeps_one_header_and_manifest_order() {
        let tmp = tempfile::tempdir().unwrap();
        let a = shard_with_table(tmp.path(), 0, "id,value\na,1\nc,3\n");
        let b = shard_with_table(tmp.path(), 1, "id,value\nb,2\nd,4\n");
        let manifest = Manifest::new(vec![a, b], String::new());

        let out = tmp.path().join("merged.csv");
        let rows = merge_tables(&manifest, ResultKind::Whole, &out).unwrap();
        assert_eq!(rows, 4);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "id,value\na,1\nc,3\nb,2\nd,4\n"
        );
    }

    #[test]
    fn embedded_repeat_header_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let a = shard_with_table(tmp.path(), 0, "id,value\na,1\n");
        // A stray header row in the middle of shard 1's data.
        let b = shard_with_table(tmp.path(), 1, "id,value\nb,2\nid,value\nc,3\n");
        let manifest = Manifest::new(vec![a, b], String::new());

        let out = tmp.path().join("merged.csv");
        merge_tables(&manifest, ResultKind::Whole, &out).unwrap();
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "id,value\na,1\nb,2\nc,3\n"
        );
    }

    #[test]
    fn header_only_shards_merge_to_header_only_table() {
        let tmp = tempfile::tempdir().unwrap();
        let a = shard_with_table(tmp.path(), 0, "id,value\n");
        let b = shard_with_table(tmp.path(), 1, "id,value\n");
        let manifest = Manifest::new(vec![a, b], String::new());

        let out = tmp.path().join("merged.csv");
        let rows = merge_tables(&manifest, ResultKind::Whole, &out).unwrap();
        assert_eq!(rows, 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "id,value\n");
    }

    #[test]
    fn missing_shard_table_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let a = shard_with_table(tmp.path(), 0, "id,value\na,1\n");
        let ghost = tmp.path().join("compounds.part_9.csv");
        std::fs::write(&ghost, "original_compound\n").unwrap();
        let manifest = Manifest::new(vec![a, ghost], String::new());

        let out = tmp.path().join("merged.csv");
        let err = merge_tables(&manifest, ResultKind::Whole, &out).unwrap_err();
        assert!(format!("{:#}", err).contains("shard 1"));
    }
}
