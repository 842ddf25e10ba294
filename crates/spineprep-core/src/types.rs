// crates/spineprep-core/src/types.rs

//! Canonical core types used across the SpinePrep workspace.
//!
//! These live in `spineprep-core` and are broadly re-exported at the crate
//! root so other crates can import via `spineprep_core::RunId`,
//! `spineprep_core::CropSidecar`, etc.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of one functional acquisition: (subject, session?, task, acq?, run).
///
/// Immutable after manifest creation; every downstream step keys its
/// wildcard rules and derivative paths on this tuple.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    /// Subject label without the `sub-` prefix (e.g. `01`).
    pub subject: String,
    /// Optional session label without the `ses-` prefix.
    pub session: Option<String>,
    /// Task label without the `task-` prefix.
    pub task: String,
    /// Optional acquisition label without the `acq-` prefix.
    pub acquisition: Option<String>,
    /// Run index (1-based).
    pub run: u32,
}

impl RunId {
    /// Underscore-joined entity key, e.g. `sub-01_ses-a_task-rest_run-01`.
    ///
    /// This is the wildcard key the orchestrator binds per-run rules to,
    /// and the filename stem prefix for every derivative of this run.
    #[must_use]
    pub fn key(&self) -> String {
        let mut s = format!("sub-{}", self.subject);
        if let Some(ses) = &self.session {
            s.push_str(&format!("_ses-{ses}"));
        }
        s.push_str(&format!("_task-{}", self.task));
        if let Some(acq) = &self.acquisition {
            s.push_str(&format!("_acq-{acq}"));
        }
        s.push_str(&format!("_run-{:02}", self.run));
        s
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A single functional run discovered in the input dataset.
///
/// Created by discovery; consumed by every downstream component; never
/// mutated after the manifest is assembled.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    /// Entity tuple identifying the run.
    pub id: RunId,
    /// Path to the 4-D image.
    pub bold_path: PathBuf,
    /// Repetition time in seconds.
    pub tr_s: f64,
    /// Phase-encode direction (e.g. `AP`), if recorded.
    pub pe_dir: Option<String>,
    /// Voxel dimensions in millimeters.
    pub voxel_dims_mm: [f32; 3],
    /// Volume count of the 4-D image.
    pub nvols: usize,
    /// Optional motion-group key for grouped motion correction.
    pub motion_group: Option<String>,
}

/// An anatomical image record (one per subject/session).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnatRecord {
    /// Subject label without the `sub-` prefix.
    pub subject: String,
    /// Optional session label.
    pub session: Option<String>,
    /// Path to the anatomical image.
    pub path: PathBuf,
    /// Modality suffix (e.g. `T2w`).
    pub modality: String,
}

/// Reason code published in a [`CropSidecar`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CropReason {
    /// No volumes trimmed (including the MAD = 0 degenerate case).
    NoCrop,
    /// Robust-z detection trimmed at least one side.
    RobustZ,
    /// No cord mask available; statistic computed over the whole FOV.
    FallbackNoMask,
    /// Detection could not run; the full range is published.
    DetectionFailed,
    /// Requested bounds were clamped into `[0, nvols]`.
    OutOfBoundsClamped,
    /// Recorded by *readers* when no sidecar was found and the full
    /// range default was used. Never written by the detector itself.
    NoSidecar,
}

impl fmt::Display for CropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoCrop => "no-crop",
            Self::RobustZ => "robust-z",
            Self::FallbackNoMask => "fallback-no-mask",
            Self::DetectionFailed => "detection-failed",
            Self::OutOfBoundsClamped => "out-of-bounds-clamped",
            Self::NoSidecar => "no-sidecar",
        };
        write!(f, "{s}")
    }
}

/// Per-run temporal-crop record: the sole authority for which volumes
/// downstream steps process.
///
/// **Invariants**
/// - `0 <= from <= to <= nvols`
/// - `to - from` equals the count of volumes that survive cropping.
/// - `nvols` equals the original volume count of the 4-D image.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CropSidecar {
    /// First kept volume index (inclusive).
    pub from: usize,
    /// One past the last kept volume index (exclusive).
    pub to: usize,
    /// Original volume count.
    pub nvols: usize,
    /// Why these bounds were chosen.
    pub reason: CropReason,
}

impl CropSidecar {
    /// Full-range sidecar (nothing trimmed).
    #[inline]
    #[must_use]
    pub const fn full(nvols: usize, reason: CropReason) -> Self {
        Self {
            from: 0,
            to: nvols,
            nvols,
            reason,
        }
    }

    /// Count of volumes that survive cropping.
    #[inline]
    #[must_use]
    pub const fn n_kept(&self) -> usize {
        self.to - self.from
    }

    /// Check the bounds invariant `0 <= from <= to <= nvols`.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.from <= self.to && self.to <= self.nvols
    }
}

/// Motion engine selection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MotionEngineKind {
    /// Per-slice correction via the slice-motion tool.
    SliceWise,
    /// Per-volume rigid-body correction via the volume-motion tool.
    Rigid3d,
    /// Slice-wise then rigid-3d, parameter tables summed component-wise.
    Hybrid,
    /// Slice-wise over the concatenated motion group.
    Grouped,
}

impl fmt::Display for MotionEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SliceWise => "slice-wise",
            Self::Rigid3d => "rigid-3d",
            Self::Hybrid => "hybrid",
            Self::Grouped => "grouped",
        };
        write!(f, "{s}")
    }
}

/// Completion status recorded in motion-parameter metadata.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MotionStatus {
    /// The configured engine ran to completion.
    Completed,
    /// Required tools were absent; zero parameters were synthesized.
    SkippedMissingTools,
    /// The image was copied through unchanged with zero parameters.
    FallbackCopy,
    /// Hybrid degraded to rigid-3d only (slice tool missing).
    FallbackRigidOnly,
}

/// Column headers of the motion-parameters table, in fixed order:
/// three translations (mm) then three rotations (radians).
pub const MOTION_PARAM_COLUMNS: [&str; 6] =
    ["trans_x", "trans_y", "trans_z", "rot_x", "rot_y", "rot_z"];

/// Six rigid-body motion parameters per post-crop volume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MotionParams {
    /// One row per post-crop volume: `[tx, ty, tz, rx, ry, rz]`.
    pub rows: Vec<[f64; 6]>,
}

impl MotionParams {
    /// All-zero table with `t` rows (the fallback shape).
    #[must_use]
    pub fn zeros(t: usize) -> Self {
        Self {
            rows: vec![[0.0; 6]; t],
        }
    }

    /// Number of rows (post-crop volume count).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Component-wise sum of two equal-length tables.
    ///
    /// Used by the hybrid engine to compose slice-wise and rigid-3d
    /// estimates. Returns `None` on length mismatch.
    #[must_use]
    pub fn sum(&self, other: &Self) -> Option<Self> {
        if self.rows.len() != other.rows.len() {
            return None;
        }
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(a, b)| {
                let mut r = [0.0; 6];
                for (i, v) in r.iter_mut().enumerate() {
                    *v = a[i] + b[i];
                }
                r
            })
            .collect();
        Some(Self { rows })
    }
}

/// Metadata accompanying a motion-parameters table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MotionMeta {
    /// Engine that produced (or synthesized) the table.
    pub engine: MotionEngineKind,
    /// Slice axis used by slice-wise engines.
    pub slice_axis: SliceAxis,
    /// Tool name → version string (or `absent`).
    pub tool_versions: std::collections::BTreeMap<String, String>,
    /// Completion status.
    pub status: MotionStatus,
    /// Crop bounds the engine operated under.
    pub crop: CropSidecar,
}

/// How a build step concluded: real outputs plus `.ok`, or placeholder
/// outputs plus `.skip`. Never partial success.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Real outputs were materialized.
    Ok,
    /// Placeholder outputs were materialized after a recoverable failure.
    Skip,
}

/// Slice axis for slice-wise motion correction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SliceAxis {
    /// Sagittal stacking.
    X,
    /// Coronal stacking.
    Y,
    /// Axial stacking (the usual cord acquisition).
    Z,
}

impl SliceAxis {
    /// Axis index into a `[x, y, z]` shape.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}
