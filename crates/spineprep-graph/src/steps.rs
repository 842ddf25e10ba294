// crates/spineprep-graph/src/steps.rs

//! Step bodies for the stages the orchestrator owns directly.
//!
//! Crop detection and motion correction live in `spineprep-motion`; the
//! external-tool stages delegate to `spineprep-adapters`. Every step obeys
//! the same contract: pre-check for a concluded output, produce real
//! outputs + `.ok` or placeholders + `.skip`, and always write provenance.

use crate::plan::{Stage, StepScope, StepSpec};
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use spineprep_adapters::{label_vertebrae, register_to_template, segment_cord, warp_mask};
use spineprep_confounds::{compute_confounds, mppca_denoise, ConfoundsRequest};
use spineprep_core::{
    deriv::{anat_path, func_path, xfm_path, Desc, Space},
    io::{clear_markers, ok_marker, skip_marker, step_concluded, up_to_date, write_marker},
    AnatRecord, Config, Manifest, Mask3, MaskSource, PipelineError, ProvenanceRecord, RunRecord,
    StepStatus, Volume4,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Execute one planned step.
///
/// # Errors
/// Errors surfacing from here are fatal (recoverable conditions have
/// already been downgraded to [`StepStatus::Skip`] by the step bodies).
pub fn run_step(
    spec: &StepSpec,
    manifest: &Manifest,
    config: &Config,
    work_root: &Path,
) -> Result<StepStatus> {
    match spec.stage {
        Stage::Segment => segment_step(run_of(spec, manifest)?, config),
        Stage::CropDetect => spineprep_motion::run_crop_step(
            run_of(spec, manifest)?,
            &config.paths.deriv_dir,
            config,
        ),
        Stage::Mppca => mppca_step(run_of(spec, manifest)?, config),
        Stage::Motion => {
            let run = run_of(spec, manifest)?;
            let group = motion_group(run, manifest);
            let work = work_root.join(spec.label().replace([':', '/'], "_"));
            std::fs::create_dir_all(&work)
                .with_context(|| format!("create work dir {}", work.display()))?;
            spineprep_motion::run_motion_step(run, &group, &config.paths.deriv_dir, config, &work)
        }
        Stage::Confounds => confounds_step(run_of(spec, manifest)?, config),
        Stage::SegmentAnat => {
            let anat = anat_of(spec, manifest)?;
            let out = anat_path(
                &config.paths.deriv_dir,
                &anat.subject,
                anat.session.as_deref(),
                Space::Native,
                Desc::Cordmask,
            );
            segment_cord(&anat.path, &out, config.options.masks.binarize_thr)
        }
        Stage::LabelVertebrae => {
            let anat = anat_of(spec, manifest)?;
            let cordmask = anat_path(
                &config.paths.deriv_dir,
                &anat.subject,
                anat.session.as_deref(),
                Space::Native,
                Desc::Cordmask,
            );
            let out = anat_path(
                &config.paths.deriv_dir,
                &anat.subject,
                anat.session.as_deref(),
                Space::Native,
                Desc::Labels,
            );
            label_vertebrae(&anat.path, &cordmask, &out)
        }
        Stage::Registration => {
            let anat = anat_of(spec, manifest)?;
            let cordmask = anat_path(
                &config.paths.deriv_dir,
                &anat.subject,
                anat.session.as_deref(),
                Space::Native,
                Desc::Cordmask,
            );
            let out = xfm_path(
                &config.paths.deriv_dir,
                &anat.subject,
                anat.session.as_deref(),
                Space::Pam50,
            );
            register_to_template(
                &anat.path,
                &cordmask,
                &config.registration.template,
                config.registration.levels,
                config.registration.use_gm_wm_masks,
                &out,
            )
        }
        Stage::MaskWarp => {
            let run = run_of(spec, manifest)?;
            let mask = func_path(&config.paths.deriv_dir, &run.id, Space::Native, Desc::Cordmask);
            let xfm = xfm_path(
                &config.paths.deriv_dir,
                &run.id.subject,
                run.id.session.as_deref(),
                Space::Pam50,
            );
            let out = func_path(&config.paths.deriv_dir, &run.id, Space::Pam50, Desc::Cordmask);
            warp_mask(&mask, &xfm, &out)
        }
    }
}

fn run_of<'m>(spec: &StepSpec, manifest: &'m Manifest) -> Result<&'m RunRecord> {
    let StepScope::Run(id) = &spec.scope else {
        return Err(anyhow!("step {} is not run-scoped", spec.label()));
    };
    manifest
        .runs
        .iter()
        .find(|r| &r.id == id)
        .ok_or_else(|| anyhow!("run {} not in manifest", id))
}

fn anat_of<'m>(spec: &StepSpec, manifest: &'m Manifest) -> Result<&'m AnatRecord> {
    let StepScope::Subject(subject, session) = &spec.scope else {
        return Err(anyhow!("step {} is not subject-scoped", spec.label()));
    };
    manifest
        .anat
        .iter()
        .find(|a| &a.subject == subject && &a.session == session)
        .ok_or_else(|| {
            PipelineError::MissingRequiredInput {
                path: format!("anat record for sub-{subject}").into(),
            }
            .into()
        })
}

/// Group members for grouped motion correction (runs sharing the key).
fn motion_group<'m>(run: &'m RunRecord, manifest: &'m Manifest) -> Vec<&'m RunRecord> {
    match &run.motion_group {
        Some(key) => manifest
            .runs
            .iter()
            .filter(|r| r.motion_group.as_ref() == Some(key))
            .collect(),
        None => vec![run],
    }
}

/// Cord-mask production for one run: tool-based or provided.
fn segment_step(run: &RunRecord, config: &Config) -> Result<StepStatus> {
    let out = func_path(&config.paths.deriv_dir, &run.id, Space::Native, Desc::Cordmask);
    match config.options.masks.source {
        MaskSource::Tool | MaskSource::None => {
            // With source `none` the stage is not planned; `tool` wraps
            // the segmentation binary with its placeholder fallback.
            segment_cord(&run.bold_path, &out, config.options.masks.binarize_thr)
        }
        MaskSource::Provided => provided_mask_step(run, config, &out),
    }
}

/// Copy a dataset-provided cord mask into the derivatives tree, falling
/// back to a zero placeholder when none is present.
fn provided_mask_step(run: &RunRecord, config: &Config, out: &Path) -> Result<StepStatus> {
    let provided = run
        .bold_path
        .parent()
        .map(|d| d.join(format!("{}_cordmask.spv", run.id.key())))
        .filter(|p| p.is_file());

    let mut freshness: Vec<PathBuf> = vec![run.bold_path.clone()];
    freshness.extend(provided.iter().cloned());
    if step_concluded(out) {
        if up_to_date(out, &freshness) {
            return Ok(if skip_marker(out).exists() {
                StepStatus::Skip
            } else {
                StepStatus::Ok
            });
        }
        clear_markers(out)?;
    }

    let mut prov = ProvenanceRecord::new(
        "segment_cord",
        out,
        provided.iter().cloned().collect(),
        json!({ "source": "provided", "binarize_thr": config.options.masks.binarize_thr }),
        BTreeMap::new(),
    );

    let status = match provided {
        Some(path) => {
            let mut mask = Mask3::read(&path)?;
            mask.binarize(config.options.masks.binarize_thr);
            mask.write(out)?;
            write_marker(&ok_marker(out))?;
            StepStatus::Ok
        }
        None => {
            let vol_header = spineprep_core::read_header(&run.bold_path)
                .with_context(|| format!("read {}", run.bold_path.display()))?;
            let shape = [
                vol_header.shape[0] as usize,
                vol_header.shape[1] as usize,
                vol_header.shape[2] as usize,
            ];
            let mask = Mask3::new(
                shape,
                vol_header.voxel_dims_mm,
                vec![0.0; shape.iter().product()],
            )?;
            mask.write(out)?;
            prov.note("no provided cord mask found; zero placeholder".to_string());
            write_marker(&skip_marker(out))?;
            StepStatus::Skip
        }
    };
    prov.write()?;
    Ok(status)
}

/// MP-PCA denoise (copy-through with `.skip` when disabled).
fn mppca_step(run: &RunRecord, config: &Config) -> Result<StepStatus> {
    let out = func_path(&config.paths.deriv_dir, &run.id, Space::Native, Desc::Mppca);
    if step_concluded(&out) {
        if up_to_date(&out, &[run.bold_path.clone()]) {
            return Ok(if skip_marker(&out).exists() {
                StepStatus::Skip
            } else {
                StepStatus::Ok
            });
        }
        clear_markers(&out)?;
    }

    if !run.bold_path.is_file() {
        return Err(PipelineError::MissingRequiredInput {
            path: run.bold_path.clone(),
        }
        .into());
    }
    let vol = Volume4::read(&run.bold_path)?;

    let (params, note, status) = if config.options.denoise.enable {
        let result = mppca_denoise(&vol);
        result.denoised.write(&out)?;
        let params = json!({
            "enable": true,
            "n_signal": result.n_signal,
            "sigma2": result.sigma2,
        });
        write_marker(&ok_marker(&out))?;
        (params, None, StepStatus::Ok)
    } else {
        vol.write(&out)?;
        write_marker(&skip_marker(&out))?;
        (
            json!({ "enable": false }),
            Some("denoise disabled; copy-through".to_string()),
            StepStatus::Skip,
        )
    };

    let mut prov = ProvenanceRecord::new(
        "mppca",
        &out,
        vec![run.bold_path.clone()],
        params,
        BTreeMap::new(),
    );
    if let Some(n) = note {
        prov.note(n);
    }
    prov.write()?;
    Ok(status)
}

/// Confounds extraction for one run.
fn confounds_step(run: &RunRecord, config: &Config) -> Result<StepStatus> {
    let root = &config.paths.deriv_dir;
    let out_tsv = func_path(root, &run.id, Space::Native, Desc::Confounds);
    let bold_path = func_path(root, &run.id, Space::Native, Desc::Motion);
    let sidecar_path = func_path(root, &run.id, Space::Native, Desc::Crop);
    let params_path = func_path(root, &run.id, Space::Native, Desc::MotionParams);
    if step_concluded(&out_tsv) {
        if up_to_date(
            &out_tsv,
            &[bold_path.clone(), sidecar_path.clone(), params_path.clone()],
        ) {
            return Ok(if skip_marker(&out_tsv).exists() {
                StepStatus::Skip
            } else {
                StepStatus::Ok
            });
        }
        clear_markers(&out_tsv)?;
    }
    let out_meta = func_path(root, &run.id, Space::Native, Desc::ConfoundsMeta);

    // The motion-corrected (post-crop) series is a hard input.
    if !bold_path.is_file() {
        return Err(PipelineError::MissingRequiredInput { path: bold_path }.into());
    }
    let bold = Volume4::read(&bold_path)?;

    // Crop bounds for the descriptor, via the sidecar contract.
    let sidecar = spineprep_motion::read_sidecar_or_default(&sidecar_path, run.nvols);
    let (effective, override_note) = spineprep_motion::apply_env_override(sidecar);

    // Motion parameters; unreadable tables degrade inside the engine.
    let motion = match spineprep_motion::read_motion_tsv(&params_path) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(run = %run.id, error = %e, "motion parameters unreadable");
            None
        }
    };

    // Tissue masks; a missing or unreadable mask skips only that tissue.
    let mut masks = Vec::new();
    let mut mask_notes = Vec::new();
    for tissue in &config.options.acompcor.tissues {
        let entry = match Desc::for_tissue(tissue) {
            Some(desc) => {
                let path = func_path(root, &run.id, Space::Native, desc);
                if path.is_file() {
                    match Mask3::read(&path) {
                        Ok(m) => (tissue.clone(), Some(m), Some(path)),
                        Err(e) => {
                            mask_notes
                                .push(format!("mask for `{tissue}` unreadable, skipped: {e}"));
                            (tissue.clone(), None, Some(path))
                        }
                    }
                } else {
                    (tissue.clone(), None, None)
                }
            }
            None => {
                mask_notes.push(format!("unrecognized tissue `{tissue}`, skipped"));
                (tissue.clone(), None, None)
            }
        };
        masks.push(entry);
    }

    let request = ConfoundsRequest {
        bold: &bold,
        bold_path: bold_path.clone(),
        motion: motion.as_ref(),
        motion_path: motion.is_some().then(|| params_path.clone()),
        masks,
        crop: effective,
        censor: &config.options.censor,
        acompcor: &config.options.acompcor,
    };
    let mut output = compute_confounds(&request);
    output.descriptor.notes.extend(mask_notes.iter().cloned());

    output.table.write(&out_tsv)?;
    output.descriptor.write(&out_meta)?;

    let mut prov = ProvenanceRecord::new(
        "confounds",
        &out_tsv,
        vec![bold_path, sidecar_path, params_path],
        json!({
            "fd_thresh_mm": config.options.censor.fd_thresh_mm,
            "dvars_thresh": config.options.censor.dvars_thresh,
            "pad_vols": config.options.censor.pad_vols,
            "min_contig_vols": config.options.censor.min_contig_vols,
            "tissues": config.options.acompcor.tissues,
            "n_components_per_tissue": config.options.acompcor.n_components_per_tissue,
            "crop_from": effective.from,
            "crop_to": effective.to,
            "crop_reason": effective.reason.to_string(),
        }),
        BTreeMap::new(),
    );
    if let Some(note) = override_note {
        prov.note(note);
    }
    for note in &output.descriptor.notes {
        prov.note(note.clone());
    }
    prov.write()?;
    write_marker(&ok_marker(&out_tsv))?;
    Ok(StepStatus::Ok)
}
