// crates/spineprep-graph/src/export.rs

//! DAG export: DOT text, or a rendered SVG when a graph renderer is on
//! PATH.

use crate::plan::Dag;
use anyhow::{Context, Result};
use spineprep_core::atomic_write_bytes;
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Graphviz renderer binary.
pub const DOT_TOOL: &str = "dot";

/// Render the DAG as DOT text.
#[must_use]
pub fn to_dot(dag: &Dag) -> String {
    let mut out = String::from("digraph spineprep {\n  rankdir=LR;\n  node [shape=box];\n");
    for step in &dag.steps {
        out.push_str(&format!("  n{} [label=\"{}\"];\n", step.id, step.label()));
    }
    for step in &dag.steps {
        for dep in &step.deps {
            out.push_str(&format!("  n{dep} -> n{};\n", step.id));
        }
    }
    out.push_str("}\n");
    out
}

/// Write the DAG to `path`.
///
/// `.svg` targets are rendered through the `dot` binary when available;
/// everything else (and `.svg` without a renderer) gets DOT text.
///
/// # Errors
/// Fails on I/O or renderer errors.
pub fn export_dag(dag: &Dag, path: &Path) -> Result<()> {
    let dot = to_dot(dag);
    let wants_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));

    if wants_svg {
        if let Ok(renderer) = which::which(DOT_TOOL) {
            let out = Command::new(renderer)
                .arg("-Tsvg")
                .arg("/dev/stdin")
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .spawn()
                .and_then(|mut child| {
                    use std::io::Write as _;
                    child
                        .stdin
                        .take()
                        .map(|mut stdin| stdin.write_all(dot.as_bytes()))
                        .transpose()?;
                    child.wait_with_output()
                })
                .context("render DAG with dot")?;
            if out.status.success() && !out.stdout.is_empty() {
                atomic_write_bytes(path, &out.stdout)?;
                info!(path = %path.display(), "DAG rendered to SVG");
                return Ok(());
            }
        }
        info!("no usable graph renderer; writing DOT text instead");
    }

    atomic_write_bytes(path, dot.as_bytes())?;
    info!(path = %path.display(), "DAG exported");
    Ok(())
}
