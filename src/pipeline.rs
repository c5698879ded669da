//! The pipeline controller: one `magi run` invocation from start to finish.
//!
//! Stages execute in their fixed order; the controller walks forward and
//! never backward. Each stage is gated on the checkpoint ledger, so running
//! the pipeline twice over the same output directory does no work the
//! second time, and an invocation after a mid-run failure resumes at the
//! first unit without a marker. Fresh run and resumed run go through the
//! exact same code path; "resume" is nothing but checkpoint lookups saying
//! "skip".
//!
//! Native stages (split, merge, filter) run in-process but checkpoint
//! through the same ledger as the external ones.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use crate::checkpoint::{CheckpointKey, CheckpointStore, FsCheckpointStore};
use crate::config::{InputKind, RunContext};
use crate::executor;
use crate::filter;
use crate::merge;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::runner;
use crate::shard::Manifest;
use crate::split;
use crate::stage::{self, StageId};

/// Execute the whole pipeline for one run context.
pub async fn run_pipeline(run: &RunContext, progress: &dyn ProgressReporter) -> Result<()> {
    validate_inputs(run)?;

    std::fs::create_dir_all(run.workdir())
        .with_context(|| format!("failed to create workdir {}", run.workdir().display()))?;
    std::fs::create_dir_all(run.logs_dir())
        .with_context(|| format!("failed to create log dir {}", run.logs_dir().display()))?;
    let store: Arc<dyn CheckpointStore> = Arc::new(FsCheckpointStore::open(run.checkpoint_dir())?);

    if run.input_kind == InputKind::MzList {
        run_resolve(run, store.as_ref(), progress).await?;
    }

    ensure_predecessor(run, store.as_ref(), StageId::Split)?;
    let manifest = run_or_load_split(run, store.as_ref(), progress)?;

    for stage in StageId::SHARDED {
        ensure_predecessor(run, store.as_ref(), stage)?;
        executor::run_sharded_stage(run, store.clone(), stage, &manifest, progress).await?;
    }

    ensure_predecessor(run, store.as_ref(), StageId::Merge)?;
    run_native_stage(store.as_ref(), StageId::Merge, progress, || {
        merge::run_merge(run, &manifest)
    })?;
    ensure_predecessor(run, store.as_ref(), StageId::Filter)?;
    run_native_stage(store.as_ref(), StageId::Filter, progress, || {
        filter::run_filter(run)
    })?;

    println!("magi run complete; results next to {}", run.output_dir.display());
    Ok(())
}

/// Fail fast on unusable inputs, before any directory is created.
pub fn validate_inputs(run: &RunContext) -> Result<()> {
    for (label, path) in [("gene fasta", &run.fasta), ("compound input", &run.compounds)] {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("{} {} does not exist", label, path.display()))?;
        if !meta.is_file() {
            anyhow::bail!("{} {} is not a file", label, path.display());
        }
        if meta.len() == 0 {
            anyhow::bail!("{} {} is empty", label, path.display());
        }
    }
    Ok(())
}

/// Detect the compound input format from its first meaningful line. A bare
/// number means an m/z measurement list, as does a single-column
/// `original_compound` header (measurement lists may carry one); anything
/// else is taken as a structure table.
pub fn detect_input_kind(path: &Path) -> Result<InputKind> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open compound input {}", path.display()))?;
    for line in std::io::BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return if line.parse::<f64>().is_ok() || line == "original_compound" {
            Ok(InputKind::MzList)
        } else {
            Ok(InputKind::StructureTable)
        };
    }
    anyhow::bail!("compound input {} has no content lines", path.display())
}

async fn run_resolve(
    run: &RunContext,
    store: &dyn CheckpointStore,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let stage = StageId::ResolveCompounds;
    let key = CheckpointKey::stage(stage);
    if store.exists(&key)? {
        progress.report(ProgressEvent::StageSkipped { stage: stage.name() });
        return Ok(());
    }
    progress.report(ProgressEvent::StageStarted {
        stage: stage.name(),
        total_shards: None,
        resumed: 0,
    });
    let spec = stage::resolve_command(run);
    runner::run_unit(store, &key, &spec, &run.stage_log(stage))
        .await
        .with_context(|| format!("stage {} failed", stage))?;
    progress.report(ProgressEvent::StageCompleted { stage: stage.name() });
    Ok(())
}

/// Split once; on later invocations load the persisted manifest and verify
/// the input hasn't changed underneath the per-shard checkpoints.
fn run_or_load_split(
    run: &RunContext,
    store: &dyn CheckpointStore,
    progress: &dyn ProgressReporter,
) -> Result<Manifest> {
    let stage = StageId::Split;
    let key = CheckpointKey::stage(stage);
    if store.exists(&key)? {
        let manifest = Manifest::load(&run.manifest_path())?;
        split::verify_manifest_input(run, &manifest)?;
        progress.report(ProgressEvent::StageSkipped { stage: stage.name() });
        return Ok(manifest);
    }
    progress.report(ProgressEvent::StageStarted {
        stage: stage.name(),
        total_shards: None,
        resumed: 0,
    });
    let manifest = split::run_split(run)?;
    store.mark(&key)?;
    progress.report(ProgressEvent::StageCompleted { stage: stage.name() });
    Ok(manifest)
}

/// The controller only walks the sequence forward, so an unmarked
/// predecessor here means a bug in the walk itself, not bad user input.
/// The resolve marker is waived for structure-table runs, which skip
/// that stage entirely.
fn ensure_predecessor(
    run: &RunContext,
    store: &dyn CheckpointStore,
    stage: StageId,
) -> Result<()> {
    let Some(pred) = stage.predecessor() else {
        return Ok(());
    };
    if pred == StageId::ResolveCompounds && run.input_kind == InputKind::StructureTable {
        return Ok(());
    }
    if !store.exists(&CheckpointKey::stage(pred))? {
        anyhow::bail!(
            "internal error: reached stage {} before {} completed",
            stage,
            pred
        );
    }
    Ok(())
}

fn run_native_stage(
    store: &dyn CheckpointStore,
    stage: StageId,
    progress: &dyn ProgressReporter,
    body: impl FnOnce() -> Result<()>,
) -> Result<()> {
    let key = CheckpointKey::stage(stage);
    if store.exists(&key)? {
        progress.report(ProgressEvent::StageSkipped { stage: stage.name() });
        return Ok(());
    }
    progress.report(ProgressEvent::StageStarted {
        stage: stage.name(),
        total_shards: None,
        resumed: 0,
    });
    body().with_context(|| format!("stage {} failed", stage))?;
    store.mark(&key)?;
    progress.report(ProgressEvent::StageCompleted { stage: stage.name() });
    Ok(())
}
