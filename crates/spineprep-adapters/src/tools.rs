// crates/spineprep-adapters/src/tools.rs

//! External-tool discovery, version capture, and checked invocation.

use spineprep_core::PipelineError;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Locate `name` on PATH.
#[must_use]
pub fn find_tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Capture `<tool> --version` (first line, trimmed).
///
/// Returns `absent` when the tool cannot be located and `unknown` when it
/// exists but does not report a version.
#[must_use]
pub fn tool_version(name: &str) -> String {
    let Some(path) = find_tool(name) else {
        return "absent".into();
    };
    let out = Command::new(&path).arg("--version").output();
    match out {
        Ok(o) => {
            let text = String::from_utf8_lossy(&o.stdout);
            text.lines()
                .next()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map_or_else(|| "unknown".into(), ToOwned::to_owned)
        }
        Err(_) => "unknown".into(),
    }
}

/// Run a prepared command, mapping non-zero exit or spawn failure to
/// [`PipelineError::ToolFailure`].
///
/// # Errors
/// Returns `ToolFailure` with an stderr excerpt on any failure.
pub fn run_checked(cmd: &mut Command, tool: &str) -> Result<(), PipelineError> {
    debug!(tool, cmd = ?cmd, "invoking external tool");
    let out = cmd.output().map_err(|e| PipelineError::ToolFailure {
        tool: tool.into(),
        message: format!("spawn failed: {e}"),
    })?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let excerpt: String = stderr.chars().take(400).collect();
        return Err(PipelineError::ToolFailure {
            tool: tool.into(),
            message: format!("exit {:?}: {excerpt}", out.status.code()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_reports_absent() {
        assert!(find_tool("definitely-not-a-real-binary-name").is_none());
        assert_eq!(tool_version("definitely-not-a-real-binary-name"), "absent");
    }

    #[test]
    fn failing_command_is_tool_failure() {
        let mut cmd = Command::new("false");
        if find_tool("false").is_some() {
            let err = run_checked(&mut cmd, "false").unwrap_err();
            assert_eq!(err.kind(), "tool-failure");
        }
    }
}
