//! Stage progress reporting.
//!
//! Reports observable progress during `magi run` so users see which stage
//! is active, how many shards are done, and what was skipped on resume.
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A stage is starting. `total_shards` is `None` for monolithic
    /// stages; `resumed` counts shards already checkpointed by an
    /// earlier invocation.
    StageStarted {
        stage: &'static str,
        total_shards: Option<usize>,
        resumed: usize,
    },
    /// One more shard of a sharded stage finished.
    ShardFinished {
        stage: &'static str,
        done: usize,
        total: usize,
    },
    /// The stage's checkpoint already existed; nothing was executed.
    StageSkipped { stage: &'static str },
    /// The stage completed and its checkpoint was written.
    StageCompleted { stage: &'static str },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "stage gene_to_reaction  3 / 8 shards".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::StageStarted {
                stage,
                total_shards,
                resumed,
            } => match total_shards {
                Some(total) if *resumed > 0 => format!(
                    "stage {}  starting  ({} of {} shards already done)\n",
                    stage, resumed, total
                ),
                Some(total) => format!("stage {}  starting  {} shards\n", stage, total),
                None => format!("stage {}  starting\n", stage),
            },
            ProgressEvent::ShardFinished { stage, done, total } => {
                format!("stage {}  {} / {} shards\n", stage, done, total)
            }
            ProgressEvent::StageSkipped { stage } => {
                format!("stage {}  already done, skipping\n", stage)
            }
            ProgressEvent::StageCompleted { stage } => format!("stage {}  done\n", stage),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::StageStarted {
                stage,
                total_shards,
                resumed,
            } => serde_json::json!({
                "event": "stage_started",
                "stage": stage,
                "total_shards": total_shards,
                "resumed": resumed
            }),
            ProgressEvent::ShardFinished { stage, done, total } => serde_json::json!({
                "event": "shard_finished",
                "stage": stage,
                "done": done,
                "total": total
            }),
            ProgressEvent::StageSkipped { stage } => serde_json::json!({
                "event": "stage_skipped",
                "stage": stage
            }),
            ProgressEvent::StageCompleted { stage } => serde_json::json!({
                "event": "stage_completed",
                "stage": stage
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!(
                "unknown progress mode '{}'; expected off, human, or json",
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_mode_parses() {
        assert_eq!("off".parse::<ProgressMode>().unwrap(), ProgressMode::Off);
        assert_eq!("human".parse::<ProgressMode>().unwrap(), ProgressMode::Human);
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert!("verbose".parse::<ProgressMode>().is_err());
    }
}
