//! Score-threshold filtering of merged result tables.
//!
//! The filter is a pure row predicate over four score columns, located by
//! header name so column order and extra columns don't matter. A row is
//! kept when all four hold:
//!
//! - `compound_score` equals the configured value exactly,
//! - `e_score_r2g` is strictly greater than its cutoff,
//! - `e_score_g2r` is strictly greater than its cutoff,
//! - `reciprocal_score` equals the configured value exactly.
//!
//! Rows whose score cells don't parse as numbers are dropped. Kept rows
//! are written byte-for-byte as read; the filter never rewrites cells.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::{FilterSettings, RunContext};
use crate::merge::ResultKind;

/// Outcome of filtering one table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FilterStats {
    pub total: u64,
    pub kept: u64,
}

struct ScoreColumns {
    compound_score: usize,
    e_score_r2g: usize,
    e_score_g2r: usize,
    reciprocal_score: usize,
}

impl ScoreColumns {
    fn locate(header: &str, path: &Path) -> Result<Self> {
        let names = split_fields(header);
        let find = |name: &str| -> Result<usize> {
            names
                .iter()
                .position(|n| n == name)
                .with_context(|| {
                    format!("{} has no '{}' column in its header", path.display(), name)
                })
        };
        Ok(Self {
            compound_score: find("compound_score")?,
            e_score_r2g: find("e_score_r2g")?,
            e_score_g2r: find("e_score_g2r")?,
            reciprocal_score: find("reciprocal_score")?,
        })
    }
}

/// Filter `input` into `output`, preserving the header. Returns row counts.
pub fn filter_table(input: &Path, output: &Path, settings: &FilterSettings) -> Result<FilterStats> {
    let file = File::open(input)
        .with_context(|| format!("failed to open merged table {}", input.display()))?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line.with_context(|| format!("failed to read {}", input.display()))?,
        None => anyhow::bail!("merged table {} is empty", input.display()),
    };
    let columns = ScoreColumns::locate(&header, input)?;

    let out = File::create(output)
        .with_context(|| format!("failed to create filtered table {}", output.display()))?;
    let mut writer = BufWriter::new(out);
    writeln!(writer, "{}", header)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let mut stats = FilterStats { total: 0, kept: 0 };
    for line in lines {
        let line = line.with_context(|| format!("failed to read {}", input.display()))?;
        stats.total += 1;
        if row_passes(&line, &columns, settings) {
            writeln!(writer, "{}", line)
                .with_context(|| format!("failed to write {}", output.display()))?;
            stats.kept += 1;
        }
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", output.display()))?;
    Ok(stats)
}

fn row_passes(line: &str, columns: &ScoreColumns, settings: &FilterSettings) -> bool {
    let fields = split_fields(line);
    let score = |index: usize| -> Option<f64> {
        fields.get(index).and_then(|f| f.trim().parse::<f64>().ok())
    };
    let (Some(compound), Some(r2g), Some(g2r), Some(reciprocal)) = (
        score(columns.compound_score),
        score(columns.e_score_r2g),
        score(columns.e_score_g2r),
        score(columns.reciprocal_score),
    ) else {
        return false;
    };
    compound == settings.compound_score
        && r2g > settings.e_score_r2g
        && g2r > settings.e_score_g2r
        && reciprocal == settings.reciprocal_score
}

/// Split one CSV line into fields, honouring double-quoted cells so a
/// comma inside a quoted compound name doesn't shift the score columns.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

/// Default output path for filtering a table standalone: the extension is
/// replaced, so `run1_magi_results.csv` becomes
/// `run1_magi_results.filtered.csv`, the same name the pipeline's filter
/// stage writes.
pub fn default_filtered_path(input: &Path) -> std::path::PathBuf {
    input.with_extension("filtered.csv")
}

/// Run the filter stage over every merged table.
pub fn run_filter(run: &RunContext) -> Result<()> {
    for kind in ResultKind::ALL {
        let input = run.merged_table(kind);
        let output = run.filtered_table(kind);
        let stats = filter_table(&input, &output, &run.settings.filter)?;
        println!(
            "filtered {}: kept {} of {} rows -> {}",
            input.display(),
            stats.kept,
            stats.total,
            output.display()
        );
    }
    Ok(())
}
