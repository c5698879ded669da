//! End-to-end pipeline tests against stub stage scripts.
//!
//! The external stages are stand-in shell scripts with the same calling
//! convention as the real workflow scripts; the scoring stub copies each
//! shard's compound table into the three result tables, so merged and
//! filtered outputs are fully predictable. Every script appends to a
//! shared calls.log, which is how the tests observe what actually ran.

use std::fs;
use std::path::{Path, PathBuf};

use magi_pipeline::config::{InputKind, RunContext, Settings, Sharding};
use magi_pipeline::pipeline;
use magi_pipeline::progress::NoProgress;

const HEADER: &str = "original_compound,compound_score,e_score_r2g,e_score_g2r,reciprocal_score";

// Default-cutoff verdicts: c1 and c4 pass, c2 fails e_score_r2g,
// c3 fails compound_score.
const ROWS: [&str; 4] = ["c1,1,6,7,2", "c2,1,4,7,2", "c3,0.5,9,9,2", "c4,1,6,6,2"];

struct Fixture {
    _tmp: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();

        fs::write(root.join("genes.fasta"), ">g1\nMSTNPKPQRK\n").unwrap();
        let mut table = format!("{}\n", HEADER);
        for row in ROWS {
            table.push_str(row);
            table.push('\n');
        }
        fs::write(root.join("compounds.csv"), table).unwrap();

        let scripts = root.join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        for name in [
            "compound_to_reaction.py",
            "gene_to_reaction.py",
            "reaction_to_gene.py",
        ] {
            // Search stubs only record that they ran. Each takes one
            // stage-specific flag pair, then --compounds <shard>, so the
            // shard table is always the fourth argument.
            fs::write(
                scripts.join(name),
                format!(
                    "#!/bin/sh\n\
                     echo {} \"$(basename \"$4\")\" >> \"$(dirname \"$0\")/calls.log\"\n",
                    name.trim_end_matches(".py")
                ),
            )
            .unwrap();
        }
        // Scoring stub: args are --compounds <shard> --output <dir>.
        // Copies the shard table into all three result tables.
        fs::write(
            scripts.join("scoring_workflow.py"),
            "#!/bin/sh\n\
             echo score \"$(basename \"$2\")\" >> \"$(dirname \"$0\")/calls.log\"\n\
             mkdir -p \"$4\"\n\
             cp \"$2\" \"$4/magi_results.csv\"\n\
             cp \"$2\" \"$4/magi_gene_results.csv\"\n\
             cp \"$2\" \"$4/magi_compound_results.csv\"\n",
        )
        .unwrap();
        // Resolution stub: args are --input <mz list> --output <table>.
        // Emits one structure row per measurement.
        fs::write(
            scripts.join("mz_to_smiles.py"),
            format!(
                "#!/bin/sh\n\
                 echo resolve >> \"$(dirname \"$0\")/calls.log\"\n\
                 echo '{}' > \"$4\"\n\
                 n=0\n\
                 while read -r mz; do\n\
                   case \"$mz\" in ''|'#'*) continue;; esac\n\
                   n=$((n+1))\n\
                   echo \"mz$n,1,6,7,2\" >> \"$4\"\n\
                 done < \"$2\"\n",
                HEADER
            ),
        )
        .unwrap();

        Fixture { _tmp: tmp, root }
    }

    fn run_context(&self, output: &str) -> RunContext {
        let mut settings = Settings::default();
        settings.install.interpreter = PathBuf::from("/bin/sh");
        settings.install.scripts_dir = self.root.join("scripts");
        RunContext {
            fasta: self.root.join("genes.fasta"),
            compounds: self.root.join("compounds.csv"),
            input_kind: InputKind::StructureTable,
            output_dir: self.root.join(output),
            sharding: Sharding::Count(2),
            jobs: 1,
            min_diameter: 12,
            settings,
        }
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.root.join("scripts").join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn checkpoint_exists(&self, output: &str, marker: &str) -> bool {
        self.root
            .join(output)
            .join(".checkpoint")
            .join(marker)
            .exists()
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn full_run_produces_merged_and_filtered_tables() {
    let fx = Fixture::new();
    let run = fx.run_context("run1");

    pipeline::run_pipeline(&run, &NoProgress).await.unwrap();

    for marker in [
        "split",
        "compound_to_reaction",
        "compound_to_reaction.part_0",
        "gene_to_reaction",
        "reaction_to_gene",
        "score",
        "score.part_1",
        "merge",
        "filter",
    ] {
        assert!(fx.checkpoint_exists("run1", marker), "missing {}", marker);
    }

    // Round-robin K=2: shard 0 gets c1,c3; shard 1 gets c2,c4. The merge
    // walks shards in manifest order.
    let merged = read(&fx.root.join("run1_magi_results.csv"));
    assert_eq!(
        merged,
        format!("{}\nc1,1,6,7,2\nc3,0.5,9,9,2\nc2,1,4,7,2\nc4,1,6,6,2\n", HEADER)
    );

    let filtered = read(&fx.root.join("run1_magi_results.filtered.csv"));
    assert_eq!(filtered, format!("{}\nc1,1,6,7,2\nc4,1,6,6,2\n", HEADER));

    // Gene- and compound-centric variants exist alongside.
    assert!(fx.root.join("run1_magi_gene_results.csv").exists());
    assert!(fx
        .root
        .join("run1_magi_compound_results.filtered.csv")
        .exists());

    // 4 sharded stages x 2 shards, no resolve stage for a structure table.
    assert_eq!(fx.calls().len(), 8);
}

#[tokio::test]
async fn second_invocation_is_a_no_op() {
    let fx = Fixture::new();
    let run = fx.run_context("run1");

    pipeline::run_pipeline(&run, &NoProgress).await.unwrap();
    let first = fx.calls();

    pipeline::run_pipeline(&run, &NoProgress).await.unwrap();
    assert_eq!(fx.calls(), first, "resume of a finished run must spawn nothing");
}

#[tokio::test]
async fn failed_shard_is_the_only_work_redone_on_resume() {
    let fx = Fixture::new();
    let run = fx.run_context("run1");

    // Scoring fails on the shard holding c2 until the ok file appears.
    let scripts = fx.root.join("scripts");
    fs::write(
        scripts.join("scoring_workflow.py"),
        "#!/bin/sh\n\
         echo score \"$(basename \"$2\")\" >> \"$(dirname \"$0\")/calls.log\"\n\
         if [ ! -f \"$(dirname \"$0\")/ok\" ] && grep -q c2 \"$2\"; then exit 1; fi\n\
         mkdir -p \"$4\"\n\
         cp \"$2\" \"$4/magi_results.csv\"\n\
         cp \"$2\" \"$4/magi_gene_results.csv\"\n\
         cp \"$2\" \"$4/magi_compound_results.csv\"\n",
    )
    .unwrap();

    let err = pipeline::run_pipeline(&run, &NoProgress).await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("score"), "error should name the stage: {}", msg);
    assert!(msg.contains("shard 1"), "error should name the shard: {}", msg);
    assert!(fx.checkpoint_exists("run1", "score.part_0"));
    assert!(!fx.checkpoint_exists("run1", "score"));

    fs::write(scripts.join("ok"), "").unwrap();
    pipeline::run_pipeline(&run, &NoProgress).await.unwrap();

    // Earlier stages ran once per shard; scoring ran twice only on the
    // shard that failed.
    let calls = fx.calls();
    let score_calls: Vec<&String> = calls.iter().filter(|c| c.starts_with("score")).collect();
    assert_eq!(score_calls.len(), 3);
    let part0 = score_calls.iter().filter(|c| c.contains("part_0")).count();
    let part1 = score_calls.iter().filter(|c| c.contains("part_1")).count();
    assert_eq!(part0, 1, "checkpointed shard must not rerun");
    assert_eq!(part1, 2, "failed shard must rerun");

    assert!(fx.checkpoint_exists("run1", "filter"));
    assert!(fx.root.join("run1_magi_results.filtered.csv").exists());
}

#[tokio::test]
async fn mz_list_input_goes_through_the_resolve_stage() {
    let fx = Fixture::new();
    fs::write(fx.root.join("masses.txt"), "151.0633\n180.0634\n").unwrap();

    let mut run = fx.run_context("run_mz");
    run.compounds = fx.root.join("masses.txt");
    run.input_kind = pipeline::detect_input_kind(&run.compounds).unwrap();
    assert_eq!(run.input_kind, InputKind::MzList);

    pipeline::run_pipeline(&run, &NoProgress).await.unwrap();

    assert!(fx.checkpoint_exists("run_mz", "resolve_compounds"));
    assert_eq!(fx.calls().iter().filter(|c| *c == "resolve").count(), 1);

    // Both resolved measurements survive into the merged table.
    let merged = read(&fx.root.join("run_mz_magi_results.csv"));
    assert!(merged.contains("mz1,1,6,7,2"));
    assert!(merged.contains("mz2,1,6,7,2"));
}

#[tokio::test]
async fn unusable_inputs_fail_before_anything_is_created() {
    let fx = Fixture::new();

    let mut run = fx.run_context("run_missing");
    run.compounds = fx.root.join("nope.csv");
    assert!(pipeline::run_pipeline(&run, &NoProgress).await.is_err());
    assert!(!run.output_dir.exists());
    assert!(fx.calls().is_empty());

    fs::write(fx.root.join("empty.csv"), "").unwrap();
    let mut run = fx.run_context("run_empty");
    run.compounds = fx.root.join("empty.csv");
    let err = pipeline::run_pipeline(&run, &NoProgress).await.unwrap_err();
    assert!(err.to_string().contains("empty"));
    assert!(!run.output_dir.exists());
}
