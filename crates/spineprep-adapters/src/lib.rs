// crates/spineprep-adapters/src/lib.rs

//! Uniform external-tool adapter contract.
//!
//! Every adapter follows the same shape: pre-check for an existing output
//! or `.skip` marker (early return), attempt the external tool, on success
//! emit outputs + `.ok`, on failure emit placeholder outputs + `.skip`,
//! and always emit a `.prov.json` record. Placeholders preserve downstream
//! dependency validity (zero-valued images with matching headers, or
//! copies of the input).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod labeling;
pub mod registration;
pub mod segmentation;
pub mod tools;
pub mod warp;

pub use labeling::label_vertebrae;
pub use registration::register_to_template;
pub use segmentation::segment_cord;
pub use tools::{find_tool, run_checked, tool_version};
pub use warp::warp_mask;

use anyhow::Result;
use spineprep_core::{
    io::{clear_markers, ok_marker, skip_marker, step_concluded, up_to_date, write_marker},
    PipelineError, ProvenanceRecord, StepStatus,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Declared identity of one adapter invocation.
pub struct AdapterSpec<'a> {
    /// Step name recorded in provenance (e.g. `segment_cord`).
    pub step: &'a str,
    /// External binary the adapter wraps.
    pub tool: &'a str,
    /// Primary output path.
    pub output: &'a Path,
    /// Declared input paths.
    pub inputs: Vec<PathBuf>,
    /// Effective parameters, echoed into provenance.
    pub params: serde_json::Value,
}

/// Drive one adapter invocation through the uniform contract.
///
/// `attempt` runs the external tool (given its resolved path) and must
/// leave the real output at `spec.output`. `placeholder` must leave a
/// shape-preserving placeholder there instead. Both write atomically.
///
/// # Errors
/// Fails only when placeholder production itself fails or the provenance
/// record cannot be committed; recoverable tool errors downgrade to
/// [`StepStatus::Skip`].
pub fn run_adapter<A, P>(spec: &AdapterSpec<'_>, attempt: A, placeholder: P) -> Result<StepStatus>
where
    A: FnOnce(&Path) -> Result<(), PipelineError>,
    P: FnOnce() -> Result<()>,
{
    // Idempotence: a concluded step whose output is at least as new as
    // every declared input returns immediately; stale outputs rebuild.
    if step_concluded(spec.output) {
        if up_to_date(spec.output, &spec.inputs) {
            let status = if skip_marker(spec.output).exists() {
                StepStatus::Skip
            } else {
                StepStatus::Ok
            };
            return Ok(status);
        }
        clear_markers(spec.output)?;
    }

    let mut prov = ProvenanceRecord::new(
        spec.step,
        spec.output,
        spec.inputs.clone(),
        spec.params.clone(),
        BTreeMap::from([(spec.tool.to_string(), tool_version(spec.tool))]),
    );

    let attempt_result = match find_tool(spec.tool) {
        Some(tool_path) => attempt(&tool_path),
        None => Err(PipelineError::ToolUnavailable {
            tool: spec.tool.into(),
        }),
    };

    let status = match attempt_result {
        Ok(()) => {
            info!(step = spec.step, output = %spec.output.display(), "adapter ok");
            write_marker(&ok_marker(spec.output))?;
            StepStatus::Ok
        }
        Err(e) if !e.is_fatal() => {
            warn!(step = spec.step, error = %e, "adapter degraded to skip");
            prov.note(e.to_string());
            placeholder()?;
            write_marker(&skip_marker(spec.output))?;
            StepStatus::Skip
        }
        Err(e) => return Err(e.into()),
    };

    prov.write()?;
    Ok(status)
}
