// crates/spineprep-adapters/src/labeling.rs

//! Vertebral-labeling adapter.
//!
//! Produces a discrete-segmentation label image from an anatomical image
//! plus its cord mask. Placeholder: all-zero labels with the anatomical
//! shape.

use crate::{run_adapter, run_checked, AdapterSpec};
use anyhow::{Context, Result};
use serde_json::json;
use spineprep_core::{read_header, Mask3, PipelineError, StepStatus};
use std::path::Path;
use std::process::Command;

/// Binary name of the labeling tool.
pub const LABELING_TOOL: &str = "sct_label_vertebrae";

/// Produce vertebral labels at `output` from `anat` guided by `cordmask`.
///
/// # Errors
/// Fails only on fatal conditions.
pub fn label_vertebrae(anat: &Path, cordmask: &Path, output: &Path) -> Result<StepStatus> {
    let spec = AdapterSpec {
        step: "label_vertebrae",
        tool: LABELING_TOOL,
        output,
        inputs: vec![anat.to_path_buf(), cordmask.to_path_buf()],
        params: json!({}),
    };

    run_adapter(
        &spec,
        |tool_path| {
            let raw = output.with_extension("raw.spv");
            run_checked(
                Command::new(tool_path)
                    .arg("-i")
                    .arg(anat)
                    .arg("-s")
                    .arg(cordmask)
                    .arg("-o")
                    .arg(&raw),
                LABELING_TOOL,
            )?;
            let labels = Mask3::read(&raw).map_err(|e| PipelineError::ToolFailure {
                tool: LABELING_TOOL.into(),
                message: format!("unreadable tool output: {e}"),
            })?;
            let _ = std::fs::remove_file(&raw);
            labels.write(output)?;
            Ok(())
        },
        || {
            let header = read_header(anat)
                .with_context(|| format!("read anat header for placeholder: {}", anat.display()))?;
            let shape = [
                header.shape[0] as usize,
                header.shape[1] as usize,
                header.shape[2] as usize,
            ];
            let labels =
                Mask3::new(shape, header.voxel_dims_mm, vec![0.0; shape.iter().product()])?;
            labels.write(output)?;
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use spineprep_core::io::skip_marker;
    use tempfile::TempDir;

    #[test]
    fn absent_tool_emits_zero_labels() {
        let dir = TempDir::new().unwrap();
        let anat = dir.path().join("t2w.spv");
        Mask3::new([5, 5, 8], [1.0; 3], vec![1.0; 200])
            .unwrap()
            .write(&anat)
            .unwrap();
        let cordmask = dir.path().join("cordmask.spv");
        Mask3::new([5, 5, 8], [1.0; 3], vec![0.0; 200])
            .unwrap()
            .write(&cordmask)
            .unwrap();

        let out = dir.path().join("labels.spv");
        let status = label_vertebrae(&anat, &cordmask, &out).unwrap();
        assert_eq!(status, StepStatus::Skip);
        assert!(skip_marker(&out).exists());
        assert_eq!(Mask3::read(&out).unwrap().n_active(), 0);
    }
}
