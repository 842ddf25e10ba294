// crates/spineprep-core/src/io.rs

//! Atomic file I/O and step status markers.
//!
//! Every text or small-file artifact goes through a temporary sibling in the
//! same directory followed by a rename; the rename is the commit point, so a
//! crash at any moment leaves either pre-step state or the fully committed
//! artifact. Status markers are zero-byte `.ok` / `.skip` siblings.

use crate::error::{PipelineError, PipelineResult};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Ensure the parent directory for a file exists (no-op if none).
///
/// # Errors
/// Returns an error if directory creation fails.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Write `bytes` to `path` atomically (temp sibling + rename).
///
/// # Errors
/// Returns [`PipelineError::AtomicCommitFailed`] if any stage of the commit
/// fails; no partial file is ever visible at `path`.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    let commit_err = |source: std::io::Error| PipelineError::AtomicCommitFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(commit_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(commit_err)?;
    tmp.write_all(bytes).map_err(commit_err)?;
    tmp.flush().map_err(commit_err)?;
    tmp.persist(path).map_err(|e| commit_err(e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and commit it atomically.
///
/// # Errors
/// Fails on serialization or commit errors.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serialize JSON for {}", path.display()))?;
    atomic_write_bytes(path, &bytes)?;
    Ok(())
}

/// Read a JSON file into `T`.
///
/// # Errors
/// Fails if the file cannot be opened or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rdr = BufReader::new(f);
    let v = serde_json::from_reader(rdr)
        .with_context(|| format!("deserialize JSON {}", path.display()))?;
    Ok(v)
}

/// Sibling `.ok` marker path for an artifact.
#[must_use]
pub fn ok_marker(artifact: &Path) -> PathBuf {
    sibling_with_suffix(artifact, ".ok")
}

/// Sibling `.skip` marker path for an artifact.
#[must_use]
pub fn skip_marker(artifact: &Path) -> PathBuf {
    sibling_with_suffix(artifact, ".skip")
}

fn sibling_with_suffix(artifact: &Path, suffix: &str) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    artifact.with_file_name(name)
}

/// Write a zero-byte marker atomically.
///
/// # Errors
/// Fails if the commit fails.
pub fn write_marker(marker_path: &Path) -> PipelineResult<()> {
    atomic_write_bytes(marker_path, b"")
}

/// Whether the step that owns `artifact` already concluded (`.ok` or `.skip`
/// marker present, or the artifact itself exists).
#[must_use]
pub fn step_concluded(artifact: &Path) -> bool {
    artifact.exists() || ok_marker(artifact).exists() || skip_marker(artifact).exists()
}

/// Remove status markers so a stale step can re-execute cleanly.
///
/// # Errors
/// Fails if an existing marker cannot be removed.
pub fn clear_markers(artifact: &Path) -> Result<()> {
    for marker in [ok_marker(artifact), skip_marker(artifact)] {
        if marker.exists() {
            fs::remove_file(&marker)
                .with_context(|| format!("remove stale marker {}", marker.display()))?;
        }
    }
    Ok(())
}

/// Whether `output` exists and is at least as new as every path in `inputs`.
///
/// Missing inputs are ignored here (the step itself enforces hard input
/// contracts); a missing output always returns `false`.
#[must_use]
pub fn up_to_date(output: &Path, inputs: &[PathBuf]) -> bool {
    let Ok(out_meta) = fs::metadata(output) else {
        return false;
    };
    let Ok(out_mtime) = out_meta.modified() else {
        return false;
    };
    for input in inputs {
        if let Ok(meta) = fs::metadata(input) {
            if let Ok(in_mtime) = meta.modified() {
                if in_mtime > out_mtime {
                    return false;
                }
            }
        }
    }
    true
}
