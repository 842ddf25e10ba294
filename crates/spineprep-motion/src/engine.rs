// crates/spineprep-motion/src/engine.rs

//! Motion-correction engines.
//!
//! | Engine     | Tool family        | On tool missing            |
//! |------------|--------------------|----------------------------|
//! | slice-wise | slice-motion tool  | skip + zero parameters     |
//! | rigid-3d   | volume-motion tool | copy-through + zero params |
//! | hybrid     | both sequentially  | fall back to rigid-3d      |
//! | grouped    | slice-wise         | skip                       |
//!
//! Every engine returns a six-column parameter table whose length equals
//! the post-crop volume count. Slice-wise engines synthesize the
//! rigid-body matrix as zeros (the slice tool reports no global rigid
//! parameters). The hybrid engine sums the two tables component-wise, an
//! approximation recorded in provenance.

use anyhow::Result;
use spineprep_adapters::{find_tool, run_checked, tool_version};
use spineprep_core::{
    MotionEngineKind, MotionParams, MotionStatus, PipelineError, SliceAxis, Volume4,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Binary name of the slice-motion tool.
pub const SLICE_TOOL: &str = "sct_fmri_moco";
/// Binary name of the volume-motion tool.
pub const VOLUME_TOOL: &str = "mcflirt";

/// Per-run input handed to an engine.
pub struct EngineRun<'a> {
    /// Post-crop series.
    pub cropped: &'a Volume4,
    /// Slice axis for slice-wise engines.
    pub slice_axis: SliceAxis,
    /// Scratch directory for tool I/O.
    pub work_dir: &'a Path,
}

/// What an engine produced.
pub struct EngineOutcome {
    /// Corrected (or copied-through) series.
    pub corrected: Volume4,
    /// Six-column table, one row per post-crop volume.
    pub params: MotionParams,
    /// Completion status.
    pub status: MotionStatus,
    /// Tool name → version string.
    pub tool_versions: BTreeMap<String, String>,
    /// Parameter composition recorded for hybrid runs (`sum`).
    pub composition: Option<&'static str>,
    /// Degradation notes for provenance.
    pub notes: Vec<String>,
}

/// Engine seam: one implementation per row of the engine table.
pub trait MotionEngine {
    /// Which engine this is.
    fn kind(&self) -> MotionEngineKind;

    /// Correct the cropped series. Recoverable tool problems degrade to a
    /// fallback outcome rather than erroring.
    ///
    /// # Errors
    /// Only fatal conditions (scratch I/O failures) error.
    fn run(&self, input: &EngineRun<'_>) -> Result<EngineOutcome>;
}

/// Resolve the configured engine.
#[must_use]
pub fn engine_for(kind: MotionEngineKind) -> Box<dyn MotionEngine> {
    match kind {
        MotionEngineKind::SliceWise => Box::new(SliceWiseEngine),
        MotionEngineKind::Rigid3d => Box::new(Rigid3dEngine),
        MotionEngineKind::Hybrid => Box::new(HybridEngine),
        MotionEngineKind::Grouped => Box::new(GroupedEngine),
    }
}

fn versions(tools: &[&str]) -> BTreeMap<String, String> {
    tools
        .iter()
        .map(|t| ((*t).to_string(), tool_version(t)))
        .collect()
}

/// Copy-through outcome with zero parameters.
fn zero_outcome(
    input: &EngineRun<'_>,
    status: MotionStatus,
    tools: &[&str],
    note: String,
) -> EngineOutcome {
    warn!("{note}");
    EngineOutcome {
        corrected: input.cropped.clone(),
        params: MotionParams::zeros(input.cropped.nvols()),
        status,
        tool_versions: versions(tools),
        composition: None,
        notes: vec![note],
    }
}

/// Stage the cropped series into the scratch directory for tool input.
fn stage_input(input: &EngineRun<'_>) -> Result<PathBuf> {
    let path = input.work_dir.join("moco_in.spv");
    input.cropped.write(&path)?;
    Ok(path)
}

/* ------------------------------ slice-wise ------------------------------- */

/// Per-slice correction via the slice-motion tool.
pub struct SliceWiseEngine;

impl SliceWiseEngine {
    /// Run the slice tool, returning the corrected series.
    fn correct(input: &EngineRun<'_>, tool_path: &Path) -> Result<Volume4, PipelineError> {
        let staged = stage_input(input).map_err(|e| PipelineError::ToolFailure {
            tool: SLICE_TOOL.into(),
            message: format!("stage input: {e}"),
        })?;
        let out = input.work_dir.join("moco_out.spv");
        let axis = match input.slice_axis {
            SliceAxis::X => "x",
            SliceAxis::Y => "y",
            SliceAxis::Z => "z",
        };
        run_checked(
            Command::new(tool_path)
                .arg("-i")
                .arg(&staged)
                .arg("-g")
                .arg(axis)
                .arg("-o")
                .arg(&out),
            SLICE_TOOL,
        )?;
        Volume4::read(&out).map_err(|e| PipelineError::ToolFailure {
            tool: SLICE_TOOL.into(),
            message: format!("unreadable corrected output: {e}"),
        })
    }
}

impl MotionEngine for SliceWiseEngine {
    fn kind(&self) -> MotionEngineKind {
        MotionEngineKind::SliceWise
    }

    fn run(&self, input: &EngineRun<'_>) -> Result<EngineOutcome> {
        let Some(tool_path) = find_tool(SLICE_TOOL) else {
            return Ok(zero_outcome(
                input,
                MotionStatus::SkippedMissingTools,
                &[SLICE_TOOL],
                format!("{SLICE_TOOL} not found; skipping with zero parameters"),
            ));
        };

        match Self::correct(input, &tool_path) {
            Ok(corrected) => {
                debug!(engine = "slice-wise", "correction complete");
                Ok(EngineOutcome {
                    // Slice tool reports no rigid parameters; zeros by contract.
                    params: MotionParams::zeros(corrected.nvols()),
                    corrected,
                    status: MotionStatus::Completed,
                    tool_versions: versions(&[SLICE_TOOL]),
                    composition: None,
                    notes: Vec::new(),
                })
            }
            Err(e) => Ok(zero_outcome(
                input,
                MotionStatus::SkippedMissingTools,
                &[SLICE_TOOL],
                format!("slice-wise correction failed: {e}"),
            )),
        }
    }
}

/* ------------------------------- rigid-3d -------------------------------- */

/// Per-volume rigid-body correction via the volume-motion tool.
pub struct Rigid3dEngine;

impl Rigid3dEngine {
    /// Run the volume tool and parse its parameter file.
    fn correct(
        input: &EngineRun<'_>,
        tool_path: &Path,
    ) -> Result<(Volume4, MotionParams), PipelineError> {
        let staged = stage_input(input).map_err(|e| PipelineError::ToolFailure {
            tool: VOLUME_TOOL.into(),
            message: format!("stage input: {e}"),
        })?;
        let out = input.work_dir.join("rigid_out.spv");
        run_checked(
            Command::new(tool_path)
                .arg("-in")
                .arg(&staged)
                .arg("-out")
                .arg(&out)
                .arg("-plots"),
            VOLUME_TOOL,
        )?;
        let corrected = Volume4::read(&out).map_err(|e| PipelineError::ToolFailure {
            tool: VOLUME_TOOL.into(),
            message: format!("unreadable corrected output: {e}"),
        })?;
        let par_path = out.with_extension("spv.par");
        let params = parse_par_file(&par_path, corrected.nvols())?;
        Ok((corrected, params))
    }
}

impl MotionEngine for Rigid3dEngine {
    fn kind(&self) -> MotionEngineKind {
        MotionEngineKind::Rigid3d
    }

    fn run(&self, input: &EngineRun<'_>) -> Result<EngineOutcome> {
        let Some(tool_path) = find_tool(VOLUME_TOOL) else {
            return Ok(zero_outcome(
                input,
                MotionStatus::FallbackCopy,
                &[VOLUME_TOOL],
                format!("{VOLUME_TOOL} not found; copying through with zero parameters"),
            ));
        };

        match Self::correct(input, &tool_path) {
            Ok((corrected, params)) => Ok(EngineOutcome {
                corrected,
                params,
                status: MotionStatus::Completed,
                tool_versions: versions(&[VOLUME_TOOL]),
                composition: None,
                notes: Vec::new(),
            }),
            Err(e) => Ok(zero_outcome(
                input,
                MotionStatus::FallbackCopy,
                &[VOLUME_TOOL],
                format!("rigid-3d correction failed: {e}"),
            )),
        }
    }
}

/// Parse the volume tool's `.par` output: six whitespace-separated columns
/// per row, rotations (radians) first, then translations (mm). Reordered
/// into the canonical translations-then-rotations layout.
fn parse_par_file(path: &Path, expect_rows: usize) -> Result<MotionParams, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::ToolFailure {
        tool: VOLUME_TOOL.into(),
        message: format!("missing parameter file {}: {e}", path.display()),
    })?;

    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(|f| f.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| PipelineError::ToolFailure {
                tool: VOLUME_TOOL.into(),
                message: format!("bad parameter line {}: {e}", lineno + 1),
            })?;
        if fields.len() != 6 {
            return Err(PipelineError::ToolFailure {
                tool: VOLUME_TOOL.into(),
                message: format!("parameter line {} has {} fields", lineno + 1, fields.len()),
            });
        }
        rows.push([fields[3], fields[4], fields[5], fields[0], fields[1], fields[2]]);
    }

    if rows.len() != expect_rows {
        return Err(PipelineError::ToolFailure {
            tool: VOLUME_TOOL.into(),
            message: format!("{} parameter rows, expected {expect_rows}", rows.len()),
        });
    }
    Ok(MotionParams { rows })
}

/* -------------------------------- hybrid --------------------------------- */

/// Slice-wise then rigid-3d; parameter tables summed component-wise.
pub struct HybridEngine;

impl MotionEngine for HybridEngine {
    fn kind(&self) -> MotionEngineKind {
        MotionEngineKind::Hybrid
    }

    fn run(&self, input: &EngineRun<'_>) -> Result<EngineOutcome> {
        if find_tool(SLICE_TOOL).is_none() {
            // Degrade to the rigid-3d stage alone.
            let mut outcome = Rigid3dEngine.run(input)?;
            if outcome.status == MotionStatus::Completed {
                outcome.status = MotionStatus::FallbackRigidOnly;
                outcome
                    .notes
                    .push(format!("{SLICE_TOOL} not found; hybrid ran rigid-3d only"));
            }
            outcome
                .tool_versions
                .insert(SLICE_TOOL.to_string(), "absent".to_string());
            return Ok(outcome);
        }

        let slice_outcome = SliceWiseEngine.run(input)?;
        if slice_outcome.status != MotionStatus::Completed {
            let mut outcome = Rigid3dEngine.run(input)?;
            if outcome.status == MotionStatus::Completed {
                outcome.status = MotionStatus::FallbackRigidOnly;
            }
            outcome.notes.extend(slice_outcome.notes);
            return Ok(outcome);
        }

        // Second stage runs on the slice-corrected series.
        let second_input = EngineRun {
            cropped: &slice_outcome.corrected,
            slice_axis: input.slice_axis,
            work_dir: input.work_dir,
        };
        let rigid_outcome = Rigid3dEngine.run(&second_input)?;

        let params = slice_outcome
            .params
            .sum(&rigid_outcome.params)
            .unwrap_or_else(|| MotionParams::zeros(input.cropped.nvols()));

        let mut tool_versions = slice_outcome.tool_versions;
        tool_versions.extend(rigid_outcome.tool_versions);
        let mut notes = slice_outcome.notes;
        notes.extend(rigid_outcome.notes);

        Ok(EngineOutcome {
            corrected: rigid_outcome.corrected,
            params,
            status: if rigid_outcome.status == MotionStatus::Completed {
                MotionStatus::Completed
            } else {
                MotionStatus::FallbackRigidOnly
            },
            tool_versions,
            composition: Some("sum"),
            notes,
        })
    }
}

/* -------------------------------- grouped -------------------------------- */

/// Slice-wise over the concatenated motion group. The coordinator hands
/// this engine the already-concatenated series.
pub struct GroupedEngine;

impl MotionEngine for GroupedEngine {
    fn kind(&self) -> MotionEngineKind {
        MotionEngineKind::Grouped
    }

    fn run(&self, input: &EngineRun<'_>) -> Result<EngineOutcome> {
        if find_tool(SLICE_TOOL).is_none() {
            return Ok(zero_outcome(
                input,
                MotionStatus::SkippedMissingTools,
                &[SLICE_TOOL],
                format!("{SLICE_TOOL} not found; grouped correction skipped"),
            ));
        }
        SliceWiseEngine.run(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spineprep_core::synth::constant_series;
    use tempfile::TempDir;

    fn run_input<'a>(vol: &'a Volume4, dir: &'a Path) -> EngineRun<'a> {
        EngineRun {
            cropped: vol,
            slice_axis: SliceAxis::Z,
            work_dir: dir,
        }
    }

    // Tool binaries are never installed in the test environment, so these
    // exercise the declared fallbacks.

    #[test]
    fn slice_wise_without_tool_skips_with_zeros() {
        let dir = TempDir::new().unwrap();
        let vol = constant_series([4, 4, 2, 3], 100.0, 2.0);
        let out = SliceWiseEngine.run(&run_input(&vol, dir.path())).unwrap();
        assert_eq!(out.status, MotionStatus::SkippedMissingTools);
        assert_eq!(out.params, MotionParams::zeros(3));
        assert_eq!(out.corrected, vol);
        assert_eq!(out.tool_versions[SLICE_TOOL], "absent");
    }

    #[test]
    fn rigid_without_tool_copies_through() {
        let dir = TempDir::new().unwrap();
        let vol = constant_series([4, 4, 2, 3], 100.0, 2.0);
        let out = Rigid3dEngine.run(&run_input(&vol, dir.path())).unwrap();
        assert_eq!(out.status, MotionStatus::FallbackCopy);
        assert_eq!(out.corrected, vol);
    }

    #[test]
    fn hybrid_without_any_tool_degrades_to_copy() {
        let dir = TempDir::new().unwrap();
        let vol = constant_series([4, 4, 2, 3], 100.0, 2.0);
        let out = HybridEngine.run(&run_input(&vol, dir.path())).unwrap();
        // Neither tool exists: rigid-3d itself falls back to copy-through.
        assert_eq!(out.status, MotionStatus::FallbackCopy);
        assert_eq!(out.params, MotionParams::zeros(3));
        assert_eq!(out.tool_versions[SLICE_TOOL], "absent");
    }

    #[test]
    fn grouped_without_tool_skips() {
        let dir = TempDir::new().unwrap();
        let vol = constant_series([4, 4, 2, 5], 100.0, 2.0);
        let out = GroupedEngine.run(&run_input(&vol, dir.path())).unwrap();
        assert_eq!(out.status, MotionStatus::SkippedMissingTools);
        assert_eq!(out.params.len(), 5);
    }

    #[test]
    fn par_file_reorders_rotations_first_layout() {
        let dir = TempDir::new().unwrap();
        let par = dir.path().join("rigid_out.spv.par");
        std::fs::write(&par, "0.01 0.02 0.03 1.0 2.0 3.0\n0 0 0 0 0 0\n").unwrap();
        let p = parse_par_file(&par, 2).unwrap();
        assert_eq!(p.rows[0], [1.0, 2.0, 3.0, 0.01, 0.02, 0.03]);
    }

    #[test]
    fn par_row_count_mismatch_is_tool_failure() {
        let dir = TempDir::new().unwrap();
        let par = dir.path().join("x.par");
        std::fs::write(&par, "0 0 0 0 0 0\n").unwrap();
        let err = parse_par_file(&par, 3).unwrap_err();
        assert_eq!(err.kind(), "tool-failure");
    }
}
