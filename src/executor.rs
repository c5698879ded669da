//! Bounded-parallel execution of a sharded stage.
//!
//! For one stage, every shard without a per-shard checkpoint gets a
//! runner invocation; at most `jobs` run at once. Shards are mutually
//! independent, so completion order is immaterial. The first failure
//! stops dispatch of new shard work; siblings already in flight run to
//! completion and keep their checkpoints, so the next invocation redoes
//! only the failed shard. The stage-level checkpoint is written only
//! after every shard has succeeded.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::checkpoint::{CheckpointKey, CheckpointStore};
use crate::config::RunContext;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::runner;
use crate::shard::{Manifest, Shard};
use crate::stage::{self, StageId};

/// Run one sharded stage to completion over the manifest.
pub async fn run_sharded_stage(
    run: &RunContext,
    store: Arc<dyn CheckpointStore>,
    stage: StageId,
    manifest: &Manifest,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    debug_assert!(stage.is_sharded());

    let stage_key = CheckpointKey::stage(stage);
    if store.exists(&stage_key)? {
        progress.report(ProgressEvent::StageSkipped { stage: stage.name() });
        return Ok(());
    }
    if manifest.is_empty() {
        anyhow::bail!("cannot run stage {}: shard manifest lists no shards", stage);
    }

    let total = manifest.len();
    let mut pending: Vec<Shard> = Vec::new();
    for shard in &manifest.shards {
        if !store.exists(&CheckpointKey::shard(stage, shard.index))? {
            pending.push(shard.clone());
        }
    }
    let resumed = total - pending.len();
    progress.report(ProgressEvent::StageStarted {
        stage: stage.name(),
        total_shards: Some(total),
        resumed,
    });

    let semaphore = Arc::new(Semaphore::new(run.jobs.max(1)));
    let mut tasks: JoinSet<(usize, Result<()>)> = JoinSet::new();
    let mut first_err: Option<anyhow::Error> = None;
    let mut done = resumed;

    for shard in pending {
        // Collect whatever has finished before dispatching more; a
        // recorded failure stops all further dispatch.
        while let Some(joined) = tasks.try_join_next() {
            record(joined, stage, &mut first_err, &mut done, total, progress);
        }
        if first_err.is_some() {
            break;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break, // pool closed; unreachable in practice
        };
        // A unit may have finished (and failed) while we were blocked on
        // the semaphore; its released permit is what woke us up. Collect
        // again before committing this shard.
        while let Some(joined) = tasks.try_join_next() {
            record(joined, stage, &mut first_err, &mut done, total, progress);
        }
        if first_err.is_some() {
            break;
        }

        let spec = stage::shard_command(stage, run, &shard);
        let log_path = shard.log_path(stage);
        let index = shard.index;
        let key = CheckpointKey::shard(stage, index);
        let store = store.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = runner::run_unit(store.as_ref(), &key, &spec, &log_path).await;
            (index, result)
        });
    }

    // Let in-flight siblings finish naturally; their checkpoints survive
    // even when the stage as a whole fails.
    while let Some(joined) = tasks.join_next().await {
        record(joined, stage, &mut first_err, &mut done, total, progress);
    }

    if let Some(err) = first_err {
        return Err(err.context(format!("stage {} failed", stage)));
    }

    store
        .mark(&stage_key)
        .with_context(|| format!("failed to checkpoint stage {}", stage))?;
    progress.report(ProgressEvent::StageCompleted { stage: stage.name() });
    Ok(())
}

fn record(
    joined: std::result::Result<(usize, Result<()>), tokio::task::JoinError>,
    stage: StageId,
    first_err: &mut Option<anyhow::Error>,
    done: &mut usize,
    total: usize,
    progress: &dyn ProgressReporter,
) {
    match joined {
        Ok((_, Ok(()))) => {
            *done += 1;
            progress.report(ProgressEvent::ShardFinished {
                stage: stage.name(),
                done: *done,
                total,
            });
        }
        Ok((index, Err(err))) => {
            if first_err.is_none() {
                *first_err = Some(err.context(format!("shard {}", index)));
            } else {
                eprintln!("stage {}: additional shard {} failure: {:#}", stage, index, err);
            }
        }
        Err(join_err) => {
            if first_err.is_none() {
                *first_err = Some(anyhow::anyhow!("shard worker panicked: {}", join_err));
            }
        }
    }
}
