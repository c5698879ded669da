//! # MAGI Pipeline
//!
//! A resumable orchestrator for the MAGI metabolite-gene association
//! workflow.
//!
//! The pipeline links metabolomics measurements to the genes plausibly
//! responsible for them. The expensive chemistry and homology searches are
//! external commands; this crate owns everything around them: input
//! validation, sharding, bounded-parallel dispatch, checkpointing, log
//! capture, merging and score filtering. Every completed unit of work
//! leaves a durable marker, so a run that dies days in resumes at the
//! first missing marker instead of starting over.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────┐   ┌──────────────────────────┐   ┌───────┐
//! │ resolve  │──▶│ split │──▶│ c2r ▶ g2r ▶ r2g ▶ score  │──▶│ merge │
//! │ (m/z in) │   │  K    │   │  per shard, ≤ jobs wide  │   │filter │
//! └──────────┘   └───────┘   └──────────────────────────┘   └───────┘
//!        every stage gated on <outdir>/.checkpoint/ markers
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! magi run --fasta genes.fasta --compounds compounds.csv --output run1
//! magi status --output run1           # where did it get to?
//! magi run --fasta genes.fasta --compounds compounds.csv --output run1
//!                                     # resumes; finished work is skipped
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML settings and the immutable per-run context |
//! | [`stage`] | The fixed stage sequence and typed external commands |
//! | [`checkpoint`] | Durable completion markers |
//! | [`shard`] | Shard identity and the split manifest |
//! | [`split`] | Round-robin table splitter |
//! | [`runner`] | Spawn/log/checkpoint one external command |
//! | [`executor`] | Bounded-parallel sharded stage execution |
//! | [`pipeline`] | The run controller |
//! | [`merge`] | Per-shard result concatenation |
//! | [`filter`] | Score-threshold filtering |
//! | [`status`] | Read-only run inspection |
//! | [`progress`] | Stage progress reporting |

pub mod checkpoint;
pub mod config;
pub mod executor;
pub mod filter;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod shard;
pub mod split;
pub mod stage;
pub mod status;
