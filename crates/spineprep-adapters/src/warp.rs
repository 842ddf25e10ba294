// crates/spineprep-adapters/src/warp.rs

//! Mask-warping adapter.
//!
//! Applies a warp field to a mask, producing the template-space mask.
//! Placeholder: the input mask copied through unchanged.

use crate::{run_adapter, run_checked, AdapterSpec};
use anyhow::{Context, Result};
use serde_json::json;
use spineprep_core::{atomic_write_bytes, Mask3, PipelineError, StepStatus};
use std::path::Path;
use std::process::Command;

/// Binary name of the warping tool.
pub const WARP_TOOL: &str = "sct_apply_transfo";

/// Warp `mask` through `xfm`, writing the result at `output`.
///
/// # Errors
/// Fails only on fatal conditions.
pub fn warp_mask(mask: &Path, xfm: &Path, output: &Path) -> Result<StepStatus> {
    let spec = AdapterSpec {
        step: "warp_mask",
        tool: WARP_TOOL,
        output,
        inputs: vec![mask.to_path_buf(), xfm.to_path_buf()],
        params: json!({ "interp": "nearest" }),
    };

    run_adapter(
        &spec,
        |tool_path| {
            let raw = output.with_extension("raw.spv");
            run_checked(
                Command::new(tool_path)
                    .arg("-i")
                    .arg(mask)
                    .arg("-w")
                    .arg(xfm)
                    .arg("-x")
                    .arg("nearest")
                    .arg("-o")
                    .arg(&raw),
                WARP_TOOL,
            )?;
            let warped = Mask3::read(&raw).map_err(|e| PipelineError::ToolFailure {
                tool: WARP_TOOL.into(),
                message: format!("unreadable warped output: {e}"),
            })?;
            let _ = std::fs::remove_file(&raw);
            warped.write(output)?;
            Ok(())
        },
        || {
            // Copy-through placeholder keeps the mask shape valid downstream.
            let bytes = std::fs::read(mask)
                .with_context(|| format!("read mask for copy-through: {}", mask.display()))?;
            atomic_write_bytes(output, &bytes)?;
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
    fn absent_tool_copies_mask_through() {
        let dir = TempDir::new().unwrap();
        let mask_path = dir.path().join("cordmask.spv");
        let mask = Mask3::new([3, 3, 4], [1.0; 3], vec![1.0; 36]).unwrap();
        mask.write(&mask_path).unwrap();
        let xfm = dir.path().join("xfm.spv");
        Mask3::new([3, 3, 4], [1.0; 3], vec![0.0; 36])
            .unwrap()
            .write(&xfm)
            .unwrap();

        let out = dir.path().join("warped.spv");
        let status = warp_mask(&mask_path, &xfm, &out).unwrap();
        assert_eq!(status, StepStatus::Skip);
        assert!(skip_marker(&out).exists());
        assert_eq!(Mask3::read(&out).unwrap(), mask);
    }
}
