// crates/spineprep-adapters/src/segmentation.rs

//! Cord segmentation adapter.
//!
//! Wraps the deep-segmentation tool to produce a binary cord mask from a
//! reference image. When the tool is absent or fails, the placeholder is a
//! zero-valued mask with the source's spatial shape, which keeps every
//! mask-consuming step unblocked (empty aCompCor, whole-FOV DVARS).

use crate::{run_adapter, run_checked, AdapterSpec};
use anyhow::{Context, Result};
use serde_json::json;
use spineprep_core::{read_header, Mask3, PipelineError, StepStatus};
use std::path::Path;
use std::process::Command;

/// Binary name of the segmentation tool.
pub const SEGMENTATION_TOOL: &str = "sct_deepseg_sc";

/// Produce a binary cord mask at `output` from `source`.
///
/// # Errors
/// Fails only on fatal conditions (unreadable source during placeholder
/// production, commit failure).
pub fn segment_cord(source: &Path, output: &Path, binarize_thr: f64) -> Result<StepStatus> {
    let spec = AdapterSpec {
        step: "segment_cord",
        tool: SEGMENTATION_TOOL,
        output,
        inputs: vec![source.to_path_buf()],
        params: json!({ "binarize_thr": binarize_thr }),
    };

    run_adapter(
        &spec,
        |tool_path| {
            let raw = output.with_extension("raw.spv");
            run_checked(
                Command::new(tool_path)
                    .arg("-i")
                    .arg(source)
                    .arg("-o")
                    .arg(&raw),
                SEGMENTATION_TOOL,
            )?;
            let mut mask = Mask3::read(&raw).map_err(|e| PipelineError::ToolFailure {
                tool: SEGMENTATION_TOOL.into(),
                message: format!("unreadable tool output: {e}"),
            })?;
            let _ = std::fs::remove_file(&raw);
            mask.binarize(binarize_thr);
            mask.write(output)?;
            Ok(())
        },
        || placeholder_mask(source, output),
    )
}

/// Zero mask matching the spatial shape of `source` (3-D or 4-D).
fn placeholder_mask(source: &Path, output: &Path) -> Result<()> {
    let header = read_header(source)
        .with_context(|| format!("read source header for placeholder: {}", source.display()))?;
    let shape = [
        header.shape[0] as usize,
        header.shape[1] as usize,
        header.shape[2] as usize,
    ];
    let mask = Mask3::new(shape, header.voxel_dims_mm, vec![0.0; shape.iter().product()])?;
    mask.write(output)?;
    Ok(())
}
