// crates/spineprep-confounds/src/lib.rs

//! Confounds engine: framewise displacement, DVARS, contiguity-aware
//! censoring, and aCompCor regressors with deterministic PCA.
//!
//! Failure semantics:
//! - missing/malformed motion parameters degrade FD to zeros
//!   (`fd_source = fallback_zeros`, noted in the descriptor);
//! - DVARS errors degrade to a zero vector with a note;
//! - a missing mask skips only that tissue's PCA;
//! - a missing 4-D image is fatal and handled by the caller before this
//!   crate is reached.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod acompcor;
pub mod censor;
pub mod dvars;
pub mod fd;
pub mod filter;
pub mod mppca;
pub mod pca;
pub mod writer;

pub use acompcor::{acompcor_tissue, TissueComponents, TissueMeta};
pub use censor::{censor_frames, CensorConfig, CensorResult};
pub use dvars::{dvars, Dvars, DvarsMask};
pub use fd::{framewise_displacement, FD_RADIUS_MM};
pub use mppca::{mppca_denoise, MppcaResult};
pub use pca::{principal_components, Pca};
pub use writer::{
    CensorSummary, ConfoundsDescriptor, ConfoundsSources, ConfoundsTable, FdSource,
};

use spineprep_core::{
    ACompCor, Censor, CropSidecar, Mask3, MotionParams, Volume4,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Everything the engine consumes for one run.
pub struct ConfoundsRequest<'a> {
    /// Post-crop 4-D series.
    pub bold: &'a Volume4,
    /// Path recorded in the descriptor sources.
    pub bold_path: PathBuf,
    /// Motion parameters (None triggers the zero fallback).
    pub motion: Option<&'a MotionParams>,
    /// Path recorded when `motion` is Some.
    pub motion_path: Option<PathBuf>,
    /// Tissue name → (mask, source path), in configured order. A `None`
    /// mask means absent or unreadable; only that tissue degrades.
    pub masks: Vec<(String, Option<Mask3>, Option<PathBuf>)>,
    /// Crop bounds the series was produced under.
    pub crop: CropSidecar,
    /// Censor configuration.
    pub censor: &'a Censor,
    /// aCompCor configuration.
    pub acompcor: &'a ACompCor,
}

/// Assembled table + descriptor.
pub struct ConfoundsOutput {
    /// The column-ordered frame.
    pub table: ConfoundsTable,
    /// The machine-readable descriptor.
    pub descriptor: ConfoundsDescriptor,
}

/// Compute the confounds frame for one run.
#[must_use]
pub fn compute_confounds(req: &ConfoundsRequest<'_>) -> ConfoundsOutput {
    let t = req.bold.nvols();
    let mut notes = Vec::new();

    // ---- Motion parameters (fallback: zero table). ----
    let (motion, fd_source) = match req.motion {
        Some(m) if m.len() == t => (m.clone(), FdSource::MotionParams),
        Some(m) => {
            let msg = format!(
                "motion table has {} rows, expected {t}; substituting zeros",
                m.len()
            );
            warn!("{msg}");
            notes.push(msg);
            (MotionParams::zeros(t), FdSource::FallbackZeros)
        }
        None => {
            notes.push("motion table missing; substituting zeros".into());
            (MotionParams::zeros(t), FdSource::FallbackZeros)
        }
    };

    let fd_values = framewise_displacement(&motion);

    // ---- DVARS (mask precedence: first available tissue mask). ----
    let dvars_input_mask = req
        .masks
        .iter()
        .find_map(|(_, m, _)| m.as_ref().filter(|m| m.n_active() > 0));
    let (dvars_values, dvars_mask) = match dvars(req.bold, dvars_input_mask) {
        Ok(d) => (d.values, Some(d.mask)),
        Err(e) => {
            let msg = format!("dvars degraded to zeros: {e}");
            warn!("{msg}");
            notes.push(msg);
            (vec![0.0; t], None)
        }
    };

    // ---- Censoring. ----
    let censor_cfg = CensorConfig {
        fd_thresh_mm: req.censor.fd_thresh_mm,
        dvars_thresh: req.censor.dvars_thresh,
        pad_vols: req.censor.pad_vols,
        min_contig_vols: req.censor.min_contig_vols,
    };
    let (censor_flags, censor_summary) = if req.censor.enable {
        let r = censor_frames(&fd_values, &dvars_values, &censor_cfg);
        let summary = CensorSummary::new(&censor_cfg, &r);
        (r.flags, Some(summary))
    } else {
        (vec![0u8; t], None)
    };

    // ---- aCompCor per configured tissue. ----
    let mut acomp = Vec::new();
    let mut tissue_meta = BTreeMap::new();
    if req.acompcor.enable {
        for tissue in &req.acompcor.tissues {
            let mask = req
                .masks
                .iter()
                .find(|(name, _, _)| name == tissue)
                .and_then(|(_, m, _)| m.as_ref());
            let tc = acompcor_tissue(tissue, req.bold, mask, req.acompcor);
            tissue_meta.insert(tissue.clone(), tc.meta());
            acomp.push(tc);
        }
    }

    let sources = ConfoundsSources {
        bold: req.bold_path.clone(),
        motion_params: req.motion_path.clone(),
        masks: req
            .masks
            .iter()
            .map(|(name, _, path)| (name.clone(), path.clone()))
            .collect(),
    };

    let descriptor = ConfoundsDescriptor {
        sources,
        fd_method: "power".into(),
        fd_radius_mm: FD_RADIUS_MM,
        fd_source,
        dvars_method: "rms_temporal_diff".into(),
        dvars_mask,
        sampling_period_s: req.bold.tr_s,
        crop_from: req.crop.from,
        crop_to: req.crop.to,
        censor: censor_summary,
        tissues: tissue_meta,
        notes,
    };

    ConfoundsOutput {
        table: ConfoundsTable {
            fd: fd_values,
            dvars: dvars_values,
            censor: censor_flags,
            acomp,
            motion,
        },
        descriptor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spineprep_core::synth::{constant_series, full_mask, noisy_series};
    use spineprep_core::CropReason;

    fn censor_cfg() -> Censor {
        Censor {
            enable: true,
            fd_thresh_mm: 0.5,
            dvars_thresh: 1.5,
            min_contig_vols: 5,
            pad_vols: 1,
        }
    }

    fn acomp_cfg() -> ACompCor {
        ACompCor {
            enable: true,
            tissues: vec!["cord".into(), "wm".into(), "csf".into()],
            n_components_per_tissue: 5,
            highpass_hz: 0.008,
            detrend: true,
            standardize: true,
        }
    }

    #[test]
    fn all_tools_absent_smoke() {
        // Constant series, no motion table, placeholder (empty) masks:
        // 9 header fields, all data rows zero.
        let bold = constant_series([6, 6, 3, 4], 100.0, 2.0);
        let censor = censor_cfg();
        let acomp = acomp_cfg();
        let masks = vec![
            ("cord".to_string(), Some(Mask3::zeros_like(&bold)), None),
            ("wm".to_string(), None, None),
            ("csf".to_string(), None, None),
        ];
        let out = compute_confounds(&ConfoundsRequest {
            bold: &bold,
            bold_path: "bold.spv".into(),
            motion: None,
            motion_path: None,
            masks,
            crop: CropSidecar::full(4, CropReason::NoCrop),
            censor: &censor,
            acompcor: &acomp,
        });

        assert_eq!(out.table.header().len(), 9);
        assert_eq!(out.table.n_rows(), 4);
        assert!(out.table.fd.iter().all(|&v| v == 0.0));
        assert!(out.table.dvars.iter().all(|&v| v == 0.0));
        assert!(out.table.censor.iter().all(|&v| v == 0));
        assert_eq!(out.descriptor.fd_source, FdSource::FallbackZeros);
        assert_eq!(out.descriptor.tissues["cord"].n_components, 0);
    }

    #[test]
    fn cropped_series_row_count() {
        let bold = noisy_series([6, 6, 3, 3], 5, 2.0);
        let censor = censor_cfg();
        let acomp = acomp_cfg();
        let motion = MotionParams::zeros(3);
        let out = compute_confounds(&ConfoundsRequest {
            bold: &bold,
            bold_path: "bold.spv".into(),
            motion: Some(&motion),
            motion_path: Some("motion.tsv".into()),
            masks: vec![],
            crop: CropSidecar {
                from: 1,
                to: 4,
                nvols: 4,
                reason: CropReason::RobustZ,
            },
            censor: &censor,
            acompcor: &acomp,
        });
        assert_eq!(out.table.n_rows(), 3);
        assert_eq!(out.descriptor.crop_from, 1);
        assert_eq!(out.descriptor.crop_to, 4);
        assert_eq!(out.descriptor.fd_source, FdSource::MotionParams);
    }

    #[test]
    fn length_mismatched_motion_degrades_to_zeros() {
        let bold = noisy_series([4, 4, 2, 5], 9, 2.0);
        let censor = censor_cfg();
        let acomp = acomp_cfg();
        let motion = MotionParams::zeros(3); // wrong length
        let out = compute_confounds(&ConfoundsRequest {
            bold: &bold,
            bold_path: "bold.spv".into(),
            motion: Some(&motion),
            motion_path: Some("motion.tsv".into()),
            masks: vec![],
            crop: CropSidecar::full(5, CropReason::NoCrop),
            censor: &censor,
            acompcor: &acomp,
        });
        assert_eq!(out.descriptor.fd_source, FdSource::FallbackZeros);
        assert!(!out.descriptor.notes.is_empty());
        assert_eq!(out.table.motion, MotionParams::zeros(5));
    }

    #[test]
    fn acompcor_respects_tissue_order_and_masks() {
        let bold = noisy_series([4, 4, 2, 8], 21, 2.0);
        let censor = censor_cfg();
        let acomp = acomp_cfg();
        let mask = full_mask(&bold);
        let out = compute_confounds(&ConfoundsRequest {
            bold: &bold,
            bold_path: "bold.spv".into(),
            motion: Some(&MotionParams::zeros(8)),
            motion_path: None,
            masks: vec![
                ("cord".to_string(), Some(mask), Some("cord.spv".into())),
                ("wm".to_string(), None, None),
                ("csf".to_string(), None, None),
            ],
            crop: CropSidecar::full(8, CropReason::NoCrop),
            censor: &censor,
            acompcor: &acomp,
        });
        let header = out.table.header();
        assert!(header.iter().any(|h| h == "acomp_cord_pc01"));
        assert!(!header.iter().any(|h| h.starts_with("acomp_wm")));
        assert_eq!(out.descriptor.tissues["wm"].n_components, 0);
        assert!(out.descriptor.tissues["cord"].n_components > 0);
    }
}
