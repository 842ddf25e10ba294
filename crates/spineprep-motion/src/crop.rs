// crates/spineprep-motion/src/crop.rs

//! Temporal-crop detection and the sidecar contract.
//!
//! Detection is robust-z on a per-volume statistic: mean within the cord
//! mask if available, else over the whole field of view. The published
//! sidecar `{from, to, nvols, reason}` is the sole authority for which
//! volumes downstream steps process; readers that find no sidecar default
//! to the full range and record `no-sidecar` in their provenance.
//!
//! `SPINEPREP_CROP_FROM` / `SPINEPREP_CROP_TO` act as an emergency
//! override of the effective bounds; when honored they are always logged
//! and surfaced as a provenance note.

use anyhow::Result;
use spineprep_core::{
    io::{atomic_write_json, read_json},
    CropReason, CropSidecar, Mask3, TemporalCrop, Volume4,
};
use std::path::Path;
use tracing::{info, warn};

/// MAD consistency scale for a normal distribution.
const MAD_SCALE: f64 = 1.4826;

/// Emergency-override environment variables.
pub const ENV_CROP_FROM: &str = "SPINEPREP_CROP_FROM";
/// See [`ENV_CROP_FROM`].
pub const ENV_CROP_TO: &str = "SPINEPREP_CROP_TO";

/// Detect the temporal crop for one run. Never errors: empty or invalid
/// input yields a full-range sidecar with reason `detection-failed`.
#[must_use]
pub fn detect_crop(vol: &Volume4, mask: Option<&Mask3>, cfg: &TemporalCrop) -> CropSidecar {
    let nvols = vol.nvols();
    if nvols == 0 {
        return CropSidecar::full(0, CropReason::DetectionFailed);
    }
    if nvols == 1 {
        return CropSidecar::full(1, CropReason::NoCrop);
    }

    let mask_usable = mask.is_some_and(|m| m.n_active() > 0);
    let s = vol.volume_means(mask.filter(|m| m.n_active() > 0));
    if s.iter().any(|v| !v.is_finite()) {
        return CropSidecar::full(nvols, CropReason::DetectionFailed);
    }

    let median = median_of(&s);
    let mad = median_of(&s.iter().map(|v| (v - median).abs()).collect::<Vec<_>>());
    if mad == 0.0 {
        // Flat statistic: z is 0 everywhere by definition.
        return CropSidecar::full(nvols, CropReason::NoCrop);
    }

    let z: Vec<f64> = s.iter().map(|v| (v - median) / (MAD_SCALE * mad)).collect();

    // Leading walk.
    let raw_lead = z.iter().take_while(|v| v.abs() > cfg.z_thresh).count();
    let from = raw_lead.min(cfg.max_trim_start);
    // Trailing walk.
    let raw_trail = z.iter().rev().take_while(|v| v.abs() > cfg.z_thresh).count();
    let trail = raw_trail.min(cfg.max_trim_end);
    let to = nvols - trail;

    if from > to {
        // Both walks collided; nothing trustworthy to publish.
        return CropSidecar::full(nvols, CropReason::DetectionFailed);
    }

    let reason = if from == 0 && to == nvols {
        CropReason::NoCrop
    } else if raw_lead > cfg.max_trim_start || raw_trail > cfg.max_trim_end {
        CropReason::OutOfBoundsClamped
    } else if mask_usable {
        CropReason::RobustZ
    } else {
        CropReason::FallbackNoMask
    };

    CropSidecar {
        from,
        to,
        nvols,
        reason,
    }
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted[sorted.len() / 2]
}

/// Publish a sidecar atomically (writer: crop-detect step only).
///
/// # Errors
/// Fails if the commit fails.
pub fn write_sidecar(path: &Path, sidecar: &CropSidecar) -> Result<()> {
    atomic_write_json(path, sidecar)
}

/// Read the sidecar for a run, defaulting to the full range with reason
/// `no-sidecar` when it does not exist. Out-of-range bounds are clamped
/// into `[0, nvols]` with reason `out-of-bounds-clamped`.
#[must_use]
pub fn read_sidecar_or_default(path: &Path, nvols: usize) -> CropSidecar {
    let Ok(mut sc) = read_json::<CropSidecar>(path) else {
        return CropSidecar::full(nvols, CropReason::NoSidecar);
    };
    if sc.nvols != nvols || !sc.is_valid() {
        sc.from = sc.from.min(nvols);
        sc.to = sc.to.clamp(sc.from, nvols);
        sc.nvols = nvols;
        sc.reason = CropReason::OutOfBoundsClamped;
    }
    sc
}

/// Apply the emergency env override, if set. Returns the effective
/// sidecar and a note for provenance when anything changed.
#[must_use]
pub fn apply_env_override(sidecar: CropSidecar) -> (CropSidecar, Option<String>) {
    let from_env = std::env::var(ENV_CROP_FROM).ok().and_then(|v| v.parse().ok());
    let to_env = std::env::var(ENV_CROP_TO).ok().and_then(|v| v.parse().ok());
    if from_env.is_none() && to_env.is_none() {
        return (sidecar, None);
    }

    let mut sc = sidecar;
    if let Some(f) = from_env {
        sc.from = f;
    }
    if let Some(t) = to_env {
        sc.to = t;
    }
    sc.from = sc.from.min(sc.nvols);
    sc.to = sc.to.clamp(sc.from, sc.nvols);
    sc.reason = CropReason::OutOfBoundsClamped;

    let note = format!(
        "crop bounds overridden via {ENV_CROP_FROM}/{ENV_CROP_TO}: [{}, {}) (was [{}, {}))",
        sc.from, sc.to, sidecar.from, sidecar.to
    );
    warn!("{note}");
    (sc, Some(note))
}

/// Log the effective crop decision once per run.
pub fn log_crop(run_key: &str, sc: &CropSidecar) {
    info!(
        run = run_key,
        from = sc.from,
        to = sc.to,
        nvols = sc.nvols,
        reason = %sc.reason,
        "temporal crop"
    );
}
