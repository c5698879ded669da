//! TOML settings and the immutable per-run context.
//!
//! [`Settings`] describes the installation: where the stage scripts live,
//! which interpreter runs them, and the default numeric parameters. It is
//! read once from `magi.toml` (or defaulted when the file is absent).
//!
//! [`RunContext`] is the explicit, immutable value holding everything one
//! invocation needs: every component receives it by reference and nothing
//! reads the ambient environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::merge::ResultKind;
use crate::stage::StageId;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub install: InstallSettings,
    pub search: SearchSettings,
    pub filter: FilterSettings,
}

/// Where the external stage commands live.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InstallSettings {
    /// Directory holding the workflow stage scripts.
    pub scripts_dir: PathBuf,
    /// Interpreter the stage scripts are run with.
    pub interpreter: PathBuf,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("/opt/magi/workflow"),
            interpreter: PathBuf::from("python3"),
        }
    }
}

/// Default numeric parameters handed to the search stages.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchSettings {
    /// Minimum retro-rule diameter for the compound-to-reaction search.
    pub min_diameter: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { min_diameter: 12 }
    }
}

/// Thresholds for the final result filter.
///
/// Defaults keep rows with a perfect compound match, forward and reverse
/// homology evidence above 5, and full reciprocal agreement (2.0).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilterSettings {
    /// Kept when `compound_score` equals this value exactly.
    pub compound_score: f64,
    /// Kept when `e_score_r2g` is strictly greater than this value.
    pub e_score_r2g: f64,
    /// Kept when `e_score_g2r` is strictly greater than this value.
    pub e_score_g2r: f64,
    /// Kept when `reciprocal_score` equals this value exactly.
    pub reciprocal_score: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            compound_score: 1.0,
            e_score_r2g: 5.0,
            e_score_g2r: 5.0,
            reciprocal_score: 2.0,
        }
    }
}

/// Load settings from a TOML file. A missing file yields the defaults; a
/// present but malformed file is an error.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.install.scripts_dir.as_os_str().is_empty() {
        anyhow::bail!("install.scripts_dir must not be empty");
    }
    if settings.install.interpreter.as_os_str().is_empty() {
        anyhow::bail!("install.interpreter must not be empty");
    }
    let f = &settings.filter;
    for (name, value) in [
        ("filter.compound_score", f.compound_score),
        ("filter.e_score_r2g", f.e_score_r2g),
        ("filter.e_score_g2r", f.e_score_g2r),
        ("filter.reciprocal_score", f.reciprocal_score),
    ] {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("{} must be a non-negative number", name);
        }
    }
    Ok(())
}

/// Format of the compound input, detected once at startup. An m/z list
/// selects the optional resolution stage; a structure table skips it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    /// Bare list of m/z measurements, one per line.
    MzList,
    /// Header-bearing table already in the structural format the search
    /// stages expect.
    StructureTable,
}

/// How the compound table is partitioned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Sharding {
    /// Split into exactly this many shards.
    Count(usize),
    /// Derive the shard count from a per-shard row ceiling:
    /// `shards = data_rows / max_rows + 1`.
    MaxRows(usize),
}

/// Everything one pipeline invocation needs, fixed at startup.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// Gene fasta input.
    pub fasta: PathBuf,
    /// Compound input: m/z list or structure table, see `input_kind`.
    pub compounds: PathBuf,
    pub input_kind: InputKind,
    /// Output directory; all checkpoints, shards and logs live under it.
    pub output_dir: PathBuf,
    pub sharding: Sharding,
    /// Concurrency budget: max sharded stage commands in flight at once.
    /// One budget for the whole run, reused by every sharded stage.
    pub jobs: usize,
    /// Minimum retro-rule diameter passed to the reaction search.
    pub min_diameter: u32,
    pub settings: Settings,
}

impl RunContext {
    /// Directory for intermediate artifacts (shards, resolved table).
    pub fn workdir(&self) -> PathBuf {
        self.output_dir.join("intermediate")
    }

    /// Directory for monolithic stage logs. Sharded stages log next to
    /// their shard files instead.
    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    /// The checkpoint ledger directory, namespaced to this run's output
    /// directory so distinct runs never collide.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_dir.join(".checkpoint")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.workdir().join("shards.manifest")
    }

    /// Where the resolution stage writes the structure table.
    pub fn resolved_table(&self) -> PathBuf {
        self.workdir().join("resolved_compounds.csv")
    }

    /// The table the splitter partitions: the resolved table when the
    /// input was an m/z list, otherwise the compound input itself.
    pub fn split_input(&self) -> PathBuf {
        match self.input_kind {
            InputKind::MzList => self.resolved_table(),
            InputKind::StructureTable => self.compounds.clone(),
        }
    }

    /// Directory the shard part files are written into.
    pub fn parts_dir(&self) -> PathBuf {
        self.workdir().join("parts")
    }

    /// Log file for a monolithic stage. Deterministic name: a rerun
    /// overwrites the stale log from a failed attempt.
    pub fn stage_log(&self, stage: StageId) -> PathBuf {
        self.logs_dir().join(format!("{}.log", stage.name()))
    }

    /// Whole-run merged table for one result kind, written as a sibling
    /// of the output directory named by its prefix.
    pub fn merged_table(&self, kind: ResultKind) -> PathBuf {
        self.sibling_file(kind.file_name())
    }

    /// Filtered variant of a merged table.
    pub fn filtered_table(&self, kind: ResultKind) -> PathBuf {
        self.sibling_file(kind.filtered_file_name())
    }

    fn sibling_file(&self, suffix: &str) -> PathBuf {
        let prefix = self
            .output_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "magi".to_string());
        let name = format!("{}_{}", prefix, suffix);
        match self.output_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
            _ => PathBuf::from(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_defaults() {
        let s = Settings::default();
        assert_eq!(s.filter.compound_score, 1.0);
        assert_eq!(s.filter.e_score_r2g, 5.0);
        assert_eq!(s.filter.e_score_g2r, 5.0);
        assert_eq!(s.filter.reciprocal_score, 2.0);
        assert_eq!(s.search.min_diameter, 12);
    }

    #[test]
    fn partial_settings_file_fills_defaults() {
        let parsed: Settings = toml::from_str(
            r#"
            [install]
            scripts_dir = "/srv/magi/workflow"

            [filter]
            e_score_r2g = 10.0
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.install.scripts_dir,
            PathBuf::from("/srv/magi/workflow")
        );
        assert_eq!(parsed.install.interpreter, PathBuf::from("python3"));
        assert_eq!(parsed.filter.e_score_r2g, 10.0);
        assert_eq!(parsed.filter.e_score_g2r, 5.0);
    }

    #[test]
    fn negative_threshold_rejected() {
        let mut s = Settings::default();
        s.filter.e_score_g2r = -1.0;
        assert!(validate_settings(&s).is_err());
    }

    fn test_run(output_dir: &str) -> RunContext {
        RunContext {
            fasta: PathBuf::from("genes.fasta"),
            compounds: PathBuf::from("compounds.csv"),
            input_kind: InputKind::StructureTable,
            output_dir: PathBuf::from(output_dir),
            sharding: Sharding::Count(2),
            jobs: 2,
            min_diameter: 12,
            settings: Settings::default(),
        }
    }

    #[test]
    fn result_tables_are_siblings_of_output_dir() {
        let run = test_run("/data/runs/exp1");
        assert_eq!(
            run.merged_table(ResultKind::Whole),
            PathBuf::from("/data/runs/exp1_magi_results.csv")
        );
        assert_eq!(
            run.filtered_table(ResultKind::GeneCentric),
            PathBuf::from("/data/runs/exp1_magi_gene_results.filtered.csv")
        );
    }

    #[test]
    fn relative_output_dir_keeps_relative_siblings() {
        let run = test_run("exp1");
        assert_eq!(
            run.merged_table(ResultKind::CompoundCentric),
            PathBuf::from("exp1_magi_compound_results.csv")
        );
    }

    #[test]
    fn split_input_follows_input_kind() {
        let mut run = test_run("out");
        assert_eq!(run.split_input(), PathBuf::from("compounds.csv"));
        run.input_kind = InputKind::MzList;
        assert_eq!(run.split_input(), run.resolved_table());
    }
}
