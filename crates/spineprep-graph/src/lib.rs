// crates/spineprep-graph/src/lib.rs

//! Processing-graph orchestrator.
//!
//! Converts a discovered manifest plus a merged configuration into a DAG
//! of build steps and executes it with dependency-aware skipping,
//! tool-availability fallbacks, and per-step provenance capture.
//!
//! - [`plan`]: manifest + config → [`Dag`] (wildcard per-run rules).
//! - [`exec`]: topological execution with the `.ok`/`.skip` contract,
//!   bounded parallelism, lock file, and the per-stage summary.
//! - [`export`]: DOT / SVG visualization.
//! - [`steps`]: step bodies for the stages the orchestrator owns.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod exec;
pub mod export;
pub mod plan;
pub mod steps;

pub use exec::{execute, ExecMode, ExecReport, StageSummary};
pub use export::{export_dag, to_dot};
pub use plan::{plan, Dag, Stage, StepScope, StepSpec};
