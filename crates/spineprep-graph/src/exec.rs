// crates/spineprep-graph/src/exec.rs

//! Topological DAG execution with skip/fallback semantics.
//!
//! Steps run in topological waves; within a wave, independent steps run
//! on a bounded rayon pool sized by `options.cores` (0 = serial). A step
//! never observes inputs from a step that has not concluded, because its
//! wave starts only after every dependency's wave finished.
//!
//! Concurrent invocations on the same derivatives root are blocked by a
//! `.lock` file; cleanup of a stale lock is the caller's responsibility.

use crate::plan::{Dag, Stage};
use crate::steps::run_step;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use spineprep_core::{deriv::lock_path, Config, Manifest, PipelineError, StepStatus};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Execution mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// Plan only; no step body runs, no primary output is written.
    DryRun,
    /// Topological execution.
    Run,
}

/// Per-stage outcome counts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    /// Steps that produced real outputs.
    pub ok: usize,
    /// Steps that degraded to placeholders.
    pub skip: usize,
    /// Steps that failed fatally.
    pub failed: usize,
}

/// Invocation-level report.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecReport {
    /// Stage name → counts.
    pub stages: BTreeMap<String, StageSummary>,
    /// Fatal failure messages, in step order.
    pub failures: Vec<String>,
}

impl ExecReport {
    /// Whether any step skipped.
    #[must_use]
    pub fn has_skip(&self) -> bool {
        self.stages.values().any(|s| s.skip > 0)
    }

    /// Whether any step failed fatally.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record(&mut self, stage: Stage, status: StepStatus) {
        let entry = self.stages.entry(stage.name().to_string()).or_default();
        match status {
            StepStatus::Ok => entry.ok += 1,
            StepStatus::Skip => entry.skip += 1,
        }
    }

    fn record_failure(&mut self, stage: Stage, message: String) {
        self.stages
            .entry(stage.name().to_string())
            .or_default()
            .failed += 1;
        self.failures.push(message);
    }
}

/// Holds the `.lock` file for the duration of one invocation.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(deriv_root: &Path) -> Result<Self> {
        let path = lock_path(deriv_root);
        if path.exists() {
            bail!(
                "another invocation holds {} (remove the stale lock to proceed)",
                path.display()
            );
        }
        std::fs::create_dir_all(deriv_root)?;
        std::fs::write(&path, b"")?;
        Ok(Self { path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Execute the DAG.
///
/// # Errors
/// Fails when the lock is held, when a work directory cannot be created,
/// or is poisoned by a panicking step body. Step-level fatal errors do
/// *not* error here; they are aggregated into the report.
pub fn execute(
    dag: &Dag,
    manifest: &Manifest,
    config: &Config,
    mode: ExecMode,
    work_root: &Path,
) -> Result<ExecReport> {
    let mut report = ExecReport::default();
    if mode == ExecMode::DryRun {
        info!(steps = dag.len(), "dry-run: nothing executed");
        return Ok(report);
    }

    let _lock = LockGuard::acquire(&config.paths.deriv_dir)?;
    std::fs::create_dir_all(work_root)?;

    let cores = config.options.cores;
    let pool = (cores > 1)
        .then(|| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(cores)
                .build()
        })
        .transpose()?;

    let mut aborted = false;
    for (wave_no, wave) in dag.waves().into_iter().enumerate() {
        if aborted {
            break;
        }
        info!(wave = wave_no, steps = wave.len(), "executing wave");

        let results: Vec<(usize, Result<StepStatus>)> = match &pool {
            Some(p) => p.install(|| {
                use rayon::prelude::*;
                wave.par_iter()
                    .map(|&id| (id, run_step(&dag.steps[id], manifest, config, work_root)))
                    .collect()
            }),
            None => wave
                .iter()
                .map(|&id| (id, run_step(&dag.steps[id], manifest, config, work_root)))
                .collect(),
        };

        for (id, result) in results {
            let spec = &dag.steps[id];
            match result {
                Ok(status) => report.record(spec.stage, status),
                Err(e) if !is_fatal(&e) => {
                    // A recoverable kind that escaped a step body still
                    // only costs that step, not the invocation.
                    error!(step = %spec.label(), error = %e, "recoverable error; counting as skip");
                    report.record(spec.stage, StepStatus::Skip);
                }
                Err(e) => {
                    error!(step = %spec.label(), error = %e, "fatal step failure");
                    report.record_failure(spec.stage, format!("{}: {e}", spec.label()));
                    // Unstarted waves are abandoned; concluded artifacts stay.
                    aborted = true;
                }
            }
        }
    }

    for (stage, s) in &report.stages {
        info!(
            stage = %stage,
            ok = s.ok,
            skip = s.skip,
            failed = s.failed,
            "stage summary"
        );
    }
    Ok(report)
}

/// Classify an error chain: fatal pipeline kinds abort the invocation.
#[must_use]
pub fn is_fatal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<PipelineError>().map_or(true, PipelineError::is_fatal)
}
