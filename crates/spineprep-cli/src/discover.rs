// crates/spineprep-cli/src/discover.rs

//! Dataset discovery: walk the hierarchical layout
//! (`sub-*/[ses-*/]func/*_bold.spv`) and assemble the manifest.
//!
//! Entity values come from the underscore-joined key-value filename;
//! volume geometry comes from the container header. Files that do not
//! parse are skipped with a warning rather than failing discovery.

use anyhow::{Context, Result};
use spineprep_core::{
    read_header, AnatRecord, Config, Manifest, MotionEngineKind, RunId, RunRecord,
};
use std::path::Path;
use tracing::warn;

/// Discover every functional run and anatomical image under `bids_dir`.
///
/// # Errors
/// Fails when the dataset root cannot be read; individual malformed
/// entries are skipped with a `warn!`.
pub fn discover(config: &Config) -> Result<Manifest> {
    let bids_dir = &config.paths.bids_dir;
    let mut manifest = Manifest::default();

    let entries = std::fs::read_dir(bids_dir)
        .with_context(|| format!("read dataset root {}", bids_dir.display()))?;
    for entry in entries {
        let subject_dir = entry?.path();
        let Some(subject) = dir_entity(&subject_dir, "sub-") else {
            continue;
        };

        // Session level is optional; a `func/` child means sessionless.
        let mut visited_any_session = false;
        for child in std::fs::read_dir(&subject_dir)? {
            let child = child?.path();
            if let Some(session) = dir_entity(&child, "ses-") {
                visited_any_session = true;
                scan_modalities(&child, &subject, Some(&session), config, &mut manifest);
            }
        }
        if !visited_any_session {
            scan_modalities(&subject_dir, &subject, None, config, &mut manifest);
        }
    }

    manifest.sort();
    Ok(manifest)
}

fn dir_entity(path: &Path, prefix: &str) -> Option<String> {
    if !path.is_dir() {
        return None;
    }
    path.file_name()?
        .to_str()?
        .strip_prefix(prefix)
        .map(ToOwned::to_owned)
}

fn scan_modalities(
    base: &Path,
    subject: &str,
    session: Option<&str>,
    config: &Config,
    manifest: &mut Manifest,
) {
    let func = base.join("func");
    if func.is_dir() {
        if let Ok(entries) = std::fs::read_dir(&func) {
            for entry in entries.flatten() {
                let path = entry.path();
                match parse_bold(&path, subject, session, config) {
                    Ok(Some(run)) => manifest.runs.push(run),
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping entry"),
                }
            }
        }
    }

    let anat = base.join("anat");
    if anat.is_dir() {
        if let Ok(entries) = std::fs::read_dir(&anat) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.ends_with("_T2w.spv") {
                    manifest.anat.push(AnatRecord {
                        subject: subject.to_string(),
                        session: session.map(ToOwned::to_owned),
                        path,
                        modality: "T2w".into(),
                    });
                }
            }
        }
    }
}

/// Parse one candidate functional file; `Ok(None)` means not a bold image.
fn parse_bold(
    path: &Path,
    subject: &str,
    session: Option<&str>,
    config: &Config,
) -> Result<Option<RunRecord>> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let Some(stem) = name.strip_suffix("_bold.spv") else {
        return Ok(None);
    };

    let mut task = None;
    let mut acquisition = None;
    let mut run_no = None;
    for part in stem.split('_') {
        if let Some(v) = part.strip_prefix("task-") {
            task = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("acq-") {
            acquisition = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("run-") {
            run_no = Some(v.parse::<u32>().context("run index")?);
        }
    }
    let task = task.context("missing task entity")?;
    let run = run_no.unwrap_or(1);

    let header = read_header(path)?;
    if header.shape.len() != 4 {
        anyhow::bail!("bold image must be 4-D (got {}-D)", header.shape.len());
    }

    let id = RunId {
        subject: subject.to_string(),
        session: session.map(ToOwned::to_owned),
        task,
        acquisition,
        run,
    };

    // Grouped motion correction shares a group per (subject, task).
    let motion_group = (config.options.motion.engine == MotionEngineKind::Grouped)
        .then(|| format!("sub-{subject}_task-{}", id.task));

    Ok(Some(RunRecord {
        id,
        bold_path: path.to_path_buf(),
        tr_s: header.tr_s.unwrap_or(1.0),
        pe_dir: None,
        voxel_dims_mm: header.voxel_dims_mm,
        nvols: header.shape[3] as usize,
        motion_group,
    }))
}
