//! # MAGI Pipeline CLI (`magi`)
//!
//! The `magi` binary drives the metabolite-gene association workflow: it
//! validates the inputs, shards the compound table, runs the external
//! search and scoring stages with bounded parallelism, and merges and
//! filters the results. Progress is checkpointed, so re-running the same
//! command over the same output directory resumes instead of restarting.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `magi run` | Execute (or resume) the full pipeline |
//! | `magi status` | Show per-stage completion for an output directory |
//! | `magi filter` | Re-filter a merged result table with custom cutoffs |
//!
//! ## Examples
//!
//! ```bash
//! # Full run, 8 shards, at most 4 external commands at once
//! magi run --fasta genes.fasta --compounds compounds.csv \
//!     --output run1 --shards 8 --jobs 4
//!
//! # Same command again: completed stages are skipped
//! magi run --fasta genes.fasta --compounds compounds.csv --output run1
//!
//! # Re-filter with looser homology cutoffs, without re-running anything
//! magi filter run1_magi_results.csv --e-score-r2g 3 --e-score-g2r 3
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use magi_pipeline::config::{self, FilterSettings, RunContext, Sharding};
use magi_pipeline::filter;
use magi_pipeline::pipeline;
use magi_pipeline::progress::ProgressMode;
use magi_pipeline::status;

/// MAGI pipeline CLI — checkpointed orchestration of the metabolite-gene
/// association workflow.
///
/// All commands accept a `--config` flag pointing to a TOML settings file.
/// A missing file falls back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "magi",
    about = "Resumable orchestrator for the MAGI metabolite-gene association workflow",
    version,
    long_about = "Runs the MAGI workflow end to end: compound resolution, sharding, the \
    compound/gene/reaction searches, scoring, merging and filtering. Completed work is \
    recorded in a checkpoint ledger under the output directory, so an interrupted run \
    resumes exactly where it stopped."
)]
struct Cli {
    /// Path to the settings file (TOML).
    ///
    /// Holds the stage script installation, the interpreter, and default
    /// search and filter parameters.
    #[arg(long, global = true, default_value = "./magi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Execute (or resume) the full pipeline.
    ///
    /// A fresh output directory runs everything; an existing one skips
    /// every stage and shard that already has a checkpoint marker. The
    /// compound input may be a structure table or a bare m/z list; the
    /// latter adds the resolution stage up front.
    Run {
        /// Gene fasta input.
        #[arg(long)]
        fasta: PathBuf,

        /// Compound input: structure table (CSV) or one m/z value per line.
        #[arg(long)]
        compounds: PathBuf,

        /// Output directory. Checkpoints, shards and logs live under it;
        /// result tables are written next to it.
        #[arg(long, default_value = "magi_output")]
        output: PathBuf,

        /// Split the compound table into exactly this many shards.
        #[arg(long, default_value_t = 4)]
        shards: usize,

        /// Derive the shard count from a per-shard row ceiling instead.
        #[arg(long, conflicts_with = "shards")]
        rows_per_shard: Option<usize>,

        /// Maximum external stage commands in flight at once.
        #[arg(long, default_value_t = 4)]
        jobs: usize,

        /// Minimum retro-rule diameter for the reaction search.
        /// Defaults to the settings file value.
        #[arg(long)]
        min_diameter: Option<u32>,

        /// Progress reporting on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Show per-stage completion for an output directory.
    ///
    /// Reads only the checkpoint ledger and the shard manifest; safe to
    /// run while a pipeline is executing.
    Status {
        /// Output directory of the run to inspect.
        #[arg(long, default_value = "magi_output")]
        output: PathBuf,
    },

    /// Re-filter a merged result table with custom cutoffs.
    ///
    /// Applies the score predicate to an existing merged table without
    /// touching the pipeline or its checkpoints. Unset cutoffs fall back
    /// to the settings file, then to the built-in defaults.
    Filter {
        /// Merged result table to filter.
        input: PathBuf,

        /// Where to write the filtered table.
        /// Defaults to the input with its extension replaced by
        /// `.filtered.csv`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Required compound match score (exact equality).
        #[arg(long)]
        compound_score: Option<f64>,

        /// Reaction-to-gene homology cutoff (strictly greater than).
        #[arg(long)]
        e_score_r2g: Option<f64>,

        /// Gene-to-reaction homology cutoff (strictly greater than).
        #[arg(long)]
        e_score_g2r: Option<f64>,

        /// Required reciprocal agreement score (exact equality).
        #[arg(long)]
        reciprocal_score: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings(&cli.config)?;

    match cli.command {
        Commands::Run {
            fasta,
            compounds,
            output,
            shards,
            rows_per_shard,
            jobs,
            min_diameter,
            progress,
        } => {
            let input_kind = pipeline::detect_input_kind(&compounds)?;
            let sharding = match rows_per_shard {
                Some(max_rows) => Sharding::MaxRows(max_rows),
                None => Sharding::Count(shards),
            };
            let run = RunContext {
                fasta,
                compounds,
                input_kind,
                output_dir: output,
                sharding,
                jobs,
                min_diameter: min_diameter.unwrap_or(settings.search.min_diameter),
                settings,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            pipeline::run_pipeline(&run, mode.reporter().as_ref()).await?;
        }
        Commands::Status { output } => {
            status::run_status(&output)?;
        }
        Commands::Filter {
            input,
            output,
            compound_score,
            e_score_r2g,
            e_score_g2r,
            reciprocal_score,
        } => {
            let defaults = settings.filter;
            let cutoffs = FilterSettings {
                compound_score: compound_score.unwrap_or(defaults.compound_score),
                e_score_r2g: e_score_r2g.unwrap_or(defaults.e_score_r2g),
                e_score_g2r: e_score_g2r.unwrap_or(defaults.e_score_g2r),
                reciprocal_score: reciprocal_score.unwrap_or(defaults.reciprocal_score),
            };
            let output = output.unwrap_or_else(|| filter::default_filtered_path(&input));
            let stats = filter::filter_table(&input, &output, &cutoffs)?;
            println!(
                "kept {} of {} rows -> {}",
                stats.kept,
                stats.total,
                output.display()
            );
        }
    }
    Ok(())
}
