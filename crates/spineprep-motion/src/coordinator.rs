// crates/spineprep-motion/src/coordinator.rs

//! Crop/motion coordinator.
//!
//! Crop detection and motion correction are separate steps coupled only
//! through the crop sidecar: the detector publishes `{from, to, nvols,
//! reason}` and the motion step (like the confounds step) reads it at
//! execution time. This keeps the processing graph free of a cycle where
//! motion planning would need every run's header at graph construction.

use crate::crop::{
    apply_env_override, detect_crop, log_crop, read_sidecar_or_default, write_sidecar,
};
use crate::engine::{engine_for, EngineRun};
use crate::params::{write_motion_meta, write_motion_tsv};
use anyhow::{Context, Result};
use serde_json::json;
use spineprep_core::{
    deriv::{func_path, Desc, Space},
    io::{clear_markers, ok_marker, skip_marker, step_concluded, up_to_date, write_marker},
    Config, CropSidecar, Mask3, MotionMeta, MotionStatus, PipelineError, ProvenanceRecord,
    RunRecord, StepStatus, Volume4,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Crop-detect step: publish the sidecar for one run.
///
/// Detection never fails soft inputs; the step always concludes OK (a
/// failed detection publishes the full range with reason
/// `detection-failed`).
///
/// # Errors
/// Fails when the 4-D image is missing (hard contract) or a commit fails.
pub fn run_crop_step(run: &RunRecord, deriv_root: &Path, config: &Config) -> Result<StepStatus> {
    let sidecar_path = func_path(deriv_root, &run.id, Space::Native, Desc::Crop);
    let mask_path = func_path(deriv_root, &run.id, Space::Native, Desc::Cordmask);
    if step_concluded(&sidecar_path) {
        if up_to_date(
            &sidecar_path,
            &[run.bold_path.clone(), mask_path.clone()],
        ) {
            return Ok(concluded_status(&sidecar_path));
        }
        clear_markers(&sidecar_path)?;
    }

    let vol = read_required(&run.bold_path)?;

    // The cord mask is optional input; absence just widens the statistic.
    let mask = Mask3::read(&mask_path).ok();

    let sidecar = if config.options.temporal_crop.enable {
        detect_crop(&vol, mask.as_ref(), &config.options.temporal_crop)
    } else {
        CropSidecar::full(vol.nvols(), spineprep_core::CropReason::NoCrop)
    };
    log_crop(&run.id.key(), &sidecar);
    write_sidecar(&sidecar_path, &sidecar)?;

    let prov = ProvenanceRecord::new(
        "crop_detect",
        &sidecar_path,
        vec![run.bold_path.clone()],
        json!({
            "method": config.options.temporal_crop.method,
            "z_thresh": config.options.temporal_crop.z_thresh,
            "max_trim_start": config.options.temporal_crop.max_trim_start,
            "max_trim_end": config.options.temporal_crop.max_trim_end,
            "mask_present": mask.is_some(),
            "reason": sidecar.reason.to_string(),
        }),
        BTreeMap::new(),
    );
    prov.write()?;
    write_marker(&ok_marker(&sidecar_path))?;
    Ok(StepStatus::Ok)
}

/// Motion-correction step for one run (plus its group members for the
/// grouped engine).
///
/// Reads the crop sidecar, applies the crop, dispatches the configured
/// engine, and commits the corrected series, the parameter table, its
/// metadata, provenance, and the status marker.
///
/// # Errors
/// Fails when the input image is missing or a commit fails.
pub fn run_motion_step(
    run: &RunRecord,
    group: &[&RunRecord],
    deriv_root: &Path,
    config: &Config,
    work_dir: &Path,
) -> Result<StepStatus> {
    let out_image = func_path(deriv_root, &run.id, Space::Native, Desc::Motion);
    let sidecar_path = func_path(deriv_root, &run.id, Space::Native, Desc::Crop);
    // Input: the denoised series if the denoise stage produced one.
    let input_path = motion_input_path(run, deriv_root);
    if step_concluded(&out_image) {
        if up_to_date(&out_image, &[input_path.clone(), sidecar_path.clone()]) {
            return Ok(concluded_status(&out_image));
        }
        clear_markers(&out_image)?;
    }
    let out_params = func_path(deriv_root, &run.id, Space::Native, Desc::MotionParams);
    let out_meta = func_path(deriv_root, &run.id, Space::Native, Desc::MotionParamsMeta);

    let input_vol = read_required(&input_path)?;

    // The sidecar is the sole authority for the effective crop.
    let sidecar = read_sidecar_or_default(&sidecar_path, input_vol.nvols());
    let (effective, override_note) = apply_env_override(sidecar);
    let cropped = input_vol
        .crop_time(effective.from, effective.to)
        .context("apply crop window")?;

    // Grouped correction concatenates the group, corrects once, and
    // slices this run's portion back out.
    let engine = engine_for(config.options.motion.engine);
    let (engine_input_vol, slice_range) =
        grouped_input(run, group, &cropped, deriv_root, config)?;
    let engine_run = EngineRun {
        cropped: &engine_input_vol,
        slice_axis: config.options.motion.slice_axis,
        work_dir,
    };
    let mut outcome = engine.run(&engine_run)?;
    if let Some((lo, hi)) = slice_range {
        outcome.corrected = outcome.corrected.crop_time(lo, hi)?;
        outcome.params.rows = outcome.params.rows[lo..hi].to_vec();
    }

    outcome.corrected.write(&out_image)?;
    write_motion_tsv(&out_params, &outcome.params)?;

    let meta = MotionMeta {
        engine: config.options.motion.engine,
        slice_axis: config.options.motion.slice_axis,
        tool_versions: outcome.tool_versions.clone(),
        status: outcome.status,
        crop: effective,
    };
    write_motion_meta(&out_meta, &meta)?;

    let mut prov = ProvenanceRecord::new(
        "motion",
        &out_image,
        vec![input_path, sidecar_path],
        json!({
            "engine": config.options.motion.engine.to_string(),
            "slice_axis": format!("{:?}", config.options.motion.slice_axis),
            "status": outcome.status,
            "composition": outcome.composition,
            "crop_from": effective.from,
            "crop_to": effective.to,
            "crop_reason": effective.reason.to_string(),
        }),
        outcome.tool_versions.clone(),
    );
    if let Some(note) = override_note {
        prov.note(note);
    }
    for note in &outcome.notes {
        prov.note(note.clone());
    }
    prov.write()?;

    let status = match outcome.status {
        MotionStatus::Completed | MotionStatus::FallbackRigidOnly => {
            write_marker(&ok_marker(&out_image))?;
            StepStatus::Ok
        }
        MotionStatus::SkippedMissingTools | MotionStatus::FallbackCopy => {
            write_marker(&skip_marker(&out_image))?;
            StepStatus::Skip
        }
    };
    info!(run = %run.id, engine = %engine.kind(), status = ?outcome.status, "motion step concluded");
    Ok(status)
}

fn concluded_status(artifact: &Path) -> StepStatus {
    if skip_marker(artifact).exists() {
        StepStatus::Skip
    } else {
        StepStatus::Ok
    }
}

fn read_required(path: &Path) -> Result<Volume4> {
    if !path.is_file() {
        return Err(PipelineError::MissingRequiredInput {
            path: path.to_path_buf(),
        }
        .into());
    }
    Volume4::read(path)
}

/// Prefer the denoised series when the denoise stage produced one.
fn motion_input_path(run: &RunRecord, deriv_root: &Path) -> PathBuf {
    let mppca = func_path(deriv_root, &run.id, Space::Native, Desc::Mppca);
    if mppca.is_file() {
        mppca
    } else {
        run.bold_path.clone()
    }
}

/// For the grouped engine: concatenate the cropped group members and
/// return the `[lo, hi)` slice of the concatenation that belongs to this
/// run. Non-grouped engines (or singleton groups) pass through.
fn grouped_input(
    run: &RunRecord,
    group: &[&RunRecord],
    cropped: &Volume4,
    deriv_root: &Path,
    config: &Config,
) -> Result<(Volume4, Option<(usize, usize)>)> {
    use spineprep_core::MotionEngineKind;

    if config.options.motion.engine != MotionEngineKind::Grouped || group.len() <= 1 {
        return Ok((cropped.clone(), None));
    }

    let mut data = Vec::new();
    let mut lo = 0;
    let mut hi = 0;
    let mut total = 0;
    for member in group {
        let vol = read_required(&motion_input_path(member, deriv_root))?;
        let sc_path = func_path(deriv_root, &member.id, Space::Native, Desc::Crop);
        let sc = read_sidecar_or_default(&sc_path, vol.nvols());
        let member_cropped = vol.crop_time(sc.from, sc.to)?;
        if member.id == run.id {
            lo = total;
            hi = total + member_cropped.nvols();
        }
        total += member_cropped.nvols();
        data.extend_from_slice(&member_cropped.data);
    }

    let concat = Volume4::new(
        [cropped.shape[0], cropped.shape[1], cropped.shape[2], total],
        cropped.voxel_dims_mm,
        cropped.tr_s,
        data,
    )?;
    Ok((concat, Some((lo, hi))))
}
