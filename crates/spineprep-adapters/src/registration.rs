// crates/spineprep-adapters/src/registration.rs

//! Template-registration adapter.
//!
//! Registers an anatomical image to the template and writes the forward
//! warp field. Placeholder: a zero warp with the anatomical shape, so
//! mask warping downstream still composes.

use crate::{run_adapter, run_checked, AdapterSpec};
use anyhow::{Context, Result};
use serde_json::json;
use spineprep_core::{read_header, Mask3, PipelineError, StepStatus};
use std::path::Path;
use std::process::Command;

/// Binary name of the registration tool.
pub const REGISTRATION_TOOL: &str = "sct_register_to_template";

/// Register `anat` to `template`, writing the warp at `output`.
///
/// # Errors
/// Fails only on fatal conditions.
pub fn register_to_template(
    anat: &Path,
    cordmask: &Path,
    template: &str,
    levels: usize,
    use_gm_wm_masks: bool,
    output: &Path,
) -> Result<StepStatus> {
    let spec = AdapterSpec {
        step: "register_template",
        tool: REGISTRATION_TOOL,
        output,
        inputs: vec![anat.to_path_buf(), cordmask.to_path_buf()],
        params: json!({
            "template": template,
            "levels": levels,
            "use_gm_wm_masks": use_gm_wm_masks,
        }),
    };

    run_adapter(
        &spec,
        |tool_path| {
            let raw = output.with_extension("raw.spv");
            let mut cmd = Command::new(tool_path);
            cmd.arg("-i")
                .arg(anat)
                .arg("-s")
                .arg(cordmask)
                .arg("-t")
                .arg(template)
                .arg("-l")
                .arg(levels.to_string())
                .arg("-owarp")
                .arg(&raw);
            if use_gm_wm_masks {
                cmd.arg("-param").arg("use-gm-wm");
            }
            run_checked(&mut cmd, REGISTRATION_TOOL)?;
            let warp_field = Mask3::read(&raw).map_err(|e| PipelineError::ToolFailure {
                tool: REGISTRATION_TOOL.into(),
                message: format!("unreadable warp output: {e}"),
            })?;
            let _ = std::fs::remove_file(&raw);
            warp_field.write(output)?;
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
            let zero = Mask3::new(shape, header.voxel_dims_mm, vec![0.0; shape.iter().product()])?;
            zero.write(output)?;
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
    fn absent_tool_emits_zero_warp() {
        let dir = TempDir::new().unwrap();
        let anat = dir.path().join("t2w.spv");
        Mask3::new([4, 4, 6], [1.0; 3], vec![2.0; 96])
            .unwrap()
            .write(&anat)
            .unwrap();
        let cordmask = dir.path().join("cordmask.spv");
        Mask3::new([4, 4, 6], [1.0; 3], vec![0.0; 96])
            .unwrap()
            .write(&cordmask)
            .unwrap();

        let out = dir.path().join("xfm.spv");
        let status = register_to_template(&anat, &cordmask, "PAM50", 2, false, &out).unwrap();
        assert_eq!(status, StepStatus::Skip);
        assert!(skip_marker(&out).exists());
    }
}
