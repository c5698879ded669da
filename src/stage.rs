//! The fixed MAGI stage sequence and typed external commands.
//!
//! A stage is one named step in the pipeline. Four of them fan out across
//! shards (the expensive searches and scoring); the rest run once over the
//! whole run. The orchestrator knows nothing about what a stage computes —
//! each external stage is an opaque command that must exit 0 on success and
//! leave its declared outputs at the given path.
//!
//! Commands are built as [`CommandSpec`] values (program + argument list)
//! and handed directly to the process spawner. Nothing here goes through a
//! shell, so paths with spaces or metacharacters are passed verbatim.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::RunContext;
use crate::shard::Shard;

/// One step of the fixed pipeline, in declared order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StageId {
    /// Optional: resolve an m/z measurement list into compound structures.
    ResolveCompounds,
    /// Partition the compound table into shards and write the manifest.
    Split,
    /// Per shard: connect compounds to candidate reactions.
    CompoundToReaction,
    /// Per shard: forward homology search, genes against reaction sequences.
    GeneToReaction,
    /// Per shard: reverse homology search, reaction sequences against genes.
    ReactionToGene,
    /// Per shard: merge search evidence and compute integrated scores.
    Score,
    /// Concatenate per-shard result tables into whole-run tables.
    Merge,
    /// Apply the score threshold filter to the merged tables.
    Filter,
}

impl StageId {
    /// The full pipeline, in execution order. The controller walks this
    /// forward and never backward.
    pub const SEQUENCE: [StageId; 8] = [
        StageId::ResolveCompounds,
        StageId::Split,
        StageId::CompoundToReaction,
        StageId::GeneToReaction,
        StageId::ReactionToGene,
        StageId::Score,
        StageId::Merge,
        StageId::Filter,
    ];

    /// The sharded stages, in execution order.
    pub const SHARDED: [StageId; 4] = [
        StageId::CompoundToReaction,
        StageId::GeneToReaction,
        StageId::ReactionToGene,
        StageId::Score,
    ];

    /// Stable name, used for checkpoint markers and log files.
    pub fn name(self) -> &'static str {
        match self {
            StageId::ResolveCompounds => "resolve_compounds",
            StageId::Split => "split",
            StageId::CompoundToReaction => "compound_to_reaction",
            StageId::GeneToReaction => "gene_to_reaction",
            StageId::ReactionToGene => "reaction_to_gene",
            StageId::Score => "score",
            StageId::Merge => "merge",
            StageId::Filter => "filter",
        }
    }

    /// Whether this stage runs once per shard (true) or once per run (false).
    pub fn is_sharded(self) -> bool {
        matches!(
            self,
            StageId::CompoundToReaction
                | StageId::GeneToReaction
                | StageId::ReactionToGene
                | StageId::Score
        )
    }

    /// The stage that must have completed before this one may start.
    /// `ResolveCompounds` is optional per run, so the controller treats a
    /// missing resolve marker as satisfied for structure-table inputs.
    pub fn predecessor(self) -> Option<StageId> {
        let idx = StageId::SEQUENCE.iter().position(|s| *s == self)?;
        if idx == 0 {
            None
        } else {
            Some(StageId::SEQUENCE[idx - 1])
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully-specified external command: program path plus argument list.
///
/// Arguments are handed to the spawner verbatim and never re-parsed, so
/// there is nothing to quote.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_path(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).arg(path.as_os_str().to_os_string())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for a in &self.args {
            write!(f, " {}", a.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Build the command for the optional compound-resolution stage: converts
/// an m/z list into the structure table the search stages expect.
pub fn resolve_command(run: &RunContext) -> CommandSpec {
    script_command(run, "mz_to_smiles.py")
        .arg_path("--input", &run.compounds)
        .arg_path("--output", &run.resolved_table())
}

/// Build the command for one sharded stage over one shard.
///
/// Every sharded stage receives the shard's compound table and its own
/// output directory; the search stages additionally receive the gene fasta
/// and the minimum retro-rule diameter. Later stages find earlier
/// intermediates inside the shard's output directory.
pub fn shard_command(stage: StageId, run: &RunContext, shard: &Shard) -> CommandSpec {
    let base = match stage {
        StageId::CompoundToReaction => script_command(run, "compound_to_reaction.py")
            .arg("--diameter")
            .arg(run.min_diameter.to_string()),
        StageId::GeneToReaction => {
            script_command(run, "gene_to_reaction.py").arg_path("--fasta", &run.fasta)
        }
        StageId::ReactionToGene => {
            script_command(run, "reaction_to_gene.py").arg_path("--fasta", &run.fasta)
        }
        StageId::Score => script_command(run, "scoring_workflow.py"),
        // Native stages never go through the external runner.
        other => unreachable!("{} is not an external sharded stage", other),
    };
    base.arg_path("--compounds", &shard.path)
        .arg_path("--output", &shard.output_dir())
}

fn script_command(run: &RunContext, script: &str) -> CommandSpec {
    CommandSpec::new(&run.settings.install.interpreter)
        .arg(run.settings.install.scripts_dir.join(script).into_os_string())
}
