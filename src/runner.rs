//! Runs one external stage command for one unit of work.
//!
//! A unit is either a whole monolithic stage or one shard of a sharded
//! stage. The child's stdout and stderr both go to the unit's log file,
//! truncated on open so a rerun never shows a failed attempt's stale tail.
//! On zero exit the unit's checkpoint is marked; on non-zero exit the
//! error names the exit status and the log location and nothing is
//! marked, leaving the unit eligible for retry on the next invocation.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;

use crate::checkpoint::{CheckpointKey, CheckpointStore};
use crate::stage::CommandSpec;

/// Execute one unit of work: spawn the command, wait, log, checkpoint.
///
/// Skips silently if the unit is already checkpointed, so callers may
/// invoke it unconditionally.
pub async fn run_unit(
    store: &dyn CheckpointStore,
    key: &CheckpointKey,
    spec: &CommandSpec,
    log_path: &Path,
) -> Result<()> {
    if store.exists(key)? {
        return Ok(());
    }

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log dir {}", parent.display()))?;
    }
    let log = std::fs::File::create(log_path)
        .with_context(|| format!("failed to create log file {}", log_path.display()))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("failed to clone log handle for {}", log_path.display()))?;

    let status = tokio::process::Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()
        .await
        .with_context(|| format!("failed to launch `{}`", spec))?;

    if !status.success() {
        anyhow::bail!(
            "`{}` failed ({}); log: {}",
            spec,
            status,
            log_path.display()
        );
    }

    store.mark(key)?;
    Ok(())
}
