// crates/spineprep-core/src/config.rs

//! Typed pipeline configuration.
//!
//! Every field carries a serde default so a partial YAML file (or none at
//! all) yields a fully populated [`Config`]. Validation runs once before
//! planning and surfaces the offending dotted key via
//! [`PipelineError::ConfigInvalid`].

use crate::error::{PipelineError, PipelineResult};
use crate::types::{MotionEngineKind, SliceAxis};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration record.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Per-stage options.
    pub options: Options,
    /// Template-registration options.
    pub registration: Registration,
    /// Input/output roots.
    pub paths: Paths,
}

/// Per-stage options.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    /// Temporal-crop detection.
    pub temporal_crop: TemporalCrop,
    /// Motion correction.
    pub motion: Motion,
    /// MP-PCA denoise.
    pub denoise: Denoise,
    /// Frame censoring.
    pub censor: Censor,
    /// Anatomical-component regression.
    pub acompcor: ACompCor,
    /// Tissue mask production.
    pub masks: Masks,
    /// Worker-pool size for step-level parallelism (0 = serial).
    pub cores: usize,
}

/// `options.temporal_crop`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TemporalCrop {
    /// Whether crop detection runs at all.
    pub enable: bool,
    /// Detection method identifier.
    pub method: String,
    /// Maximum volumes trimmed from the start.
    pub max_trim_start: usize,
    /// Maximum volumes trimmed from the end.
    pub max_trim_end: usize,
    /// Robust-z threshold (strict `>` on `|z|`).
    pub z_thresh: f64,
}

impl Default for TemporalCrop {
    fn default() -> Self {
        Self {
            enable: true,
            method: "cord_mean_robust_z".into(),
            max_trim_start: 5,
            max_trim_end: 5,
            z_thresh: 3.0,
        }
    }
}

/// `options.motion`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Motion {
    /// Engine selection.
    pub engine: MotionEngineKind,
    /// Slice axis for slice-wise engines.
    pub slice_axis: SliceAxis,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            engine: MotionEngineKind::SliceWise,
            slice_axis: SliceAxis::Z,
        }
    }
}

/// `options.denoise` (MP-PCA).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Denoise {
    /// Whether the denoise stage transforms the data (else copy-through).
    pub enable: bool,
}

impl Default for Denoise {
    fn default() -> Self {
        Self { enable: true }
    }
}

/// `options.censor`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Censor {
    /// Whether censoring flags are computed.
    pub enable: bool,
    /// FD threshold in millimeters (strict `>`).
    pub fd_thresh_mm: f64,
    /// DVARS threshold (strict `>`).
    pub dvars_thresh: f64,
    /// Minimum contiguous kept run length.
    pub min_contig_vols: usize,
    /// Symmetric padding applied around each flagged volume.
    pub pad_vols: usize,
}

impl Default for Censor {
    fn default() -> Self {
        Self {
            enable: true,
            fd_thresh_mm: 0.5,
            dvars_thresh: 1.5,
            min_contig_vols: 5,
            pad_vols: 1,
        }
    }
}

/// `options.acompcor`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ACompCor {
    /// Whether aCompCor columns are computed.
    pub enable: bool,
    /// Tissues in output-column order (e.g. `["cord", "wm", "csf"]`).
    pub tissues: Vec<String>,
    /// Upper bound on components per tissue.
    pub n_components_per_tissue: usize,
    /// High-pass cutoff in Hz (0 disables the filter).
    pub highpass_hz: f64,
    /// Linear detrending before PCA.
    pub detrend: bool,
    /// Per-voxel z-score standardization before PCA.
    pub standardize: bool,
}

impl Default for ACompCor {
    fn default() -> Self {
        Self {
            enable: true,
            tissues: vec!["cord".into(), "wm".into(), "csf".into()],
            n_components_per_tissue: 5,
            highpass_hz: 0.008,
            detrend: true,
            standardize: true,
        }
    }
}

/// Where tissue masks come from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MaskSource {
    /// Produced by the segmentation tool adapter.
    Tool,
    /// Supplied alongside the dataset.
    Provided,
    /// No masks; mask-consuming steps degrade.
    None,
}

/// `options.masks`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Masks {
    /// Whether mask production runs.
    pub enable: bool,
    /// Mask provenance.
    pub source: MaskSource,
    /// Binarization threshold applied to probabilistic masks.
    pub binarize_thr: f64,
}

impl Default for Masks {
    fn default() -> Self {
        Self {
            enable: true,
            source: MaskSource::Tool,
            binarize_thr: 0.5,
        }
    }
}

/// `registration.*`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Registration {
    /// Whether registration (and mask warping) stages are planned.
    pub enable: bool,
    /// Template identifier.
    pub template: String,
    /// Multi-resolution level count.
    pub levels: usize,
    /// Use GM/WM masks to drive registration.
    pub use_gm_wm_masks: bool,
}

impl Default for Registration {
    fn default() -> Self {
        Self {
            enable: false,
            template: "PAM50".into(),
            levels: 2,
            use_gm_wm_masks: false,
        }
    }
}

/// `paths.*`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Paths {
    /// Input dataset root.
    pub bids_dir: PathBuf,
    /// Output derivatives root.
    pub deriv_dir: PathBuf,
}

impl Config {
    /// Load a YAML configuration file (missing keys take defaults).
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Self =
            serde_yaml::from_str(&src).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Serialize the effective configuration as YAML (for `--print-config`).
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serialize effective configuration")
    }

    /// Validate recognized keys. Runs once before planning.
    ///
    /// # Errors
    /// Returns [`PipelineError::ConfigInvalid`] naming the offending key.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |key: &str, message: String| PipelineError::ConfigInvalid {
            key: key.into(),
            message,
        };

        if self.options.temporal_crop.enable
            && self.options.temporal_crop.method != "cord_mean_robust_z"
        {
            return Err(invalid(
                "options.temporal_crop.method",
                format!(
                    "unknown method `{}` (supported: cord_mean_robust_z)",
                    self.options.temporal_crop.method
                ),
            ));
        }
        if self.options.temporal_crop.z_thresh <= 0.0 {
            return Err(invalid(
                "options.temporal_crop.z_thresh",
                format!("must be > 0 (got {})", self.options.temporal_crop.z_thresh),
            ));
        }
        if self.options.censor.fd_thresh_mm <= 0.0 {
            return Err(invalid(
                "options.censor.fd_thresh_mm",
                format!("must be > 0 (got {})", self.options.censor.fd_thresh_mm),
            ));
        }
        if self.options.censor.dvars_thresh <= 0.0 {
            return Err(invalid(
                "options.censor.dvars_thresh",
                format!("must be > 0 (got {})", self.options.censor.dvars_thresh),
            ));
        }
        if self.options.censor.min_contig_vols == 0 {
            return Err(invalid(
                "options.censor.min_contig_vols",
                "must be >= 1".into(),
            ));
        }
        if self.options.acompcor.enable && self.options.acompcor.n_components_per_tissue == 0 {
            return Err(invalid(
                "options.acompcor.n_components_per_tissue",
                "must be >= 1 when acompcor is enabled".into(),
            ));
        }
        if self.options.acompcor.highpass_hz < 0.0 {
            return Err(invalid(
                "options.acompcor.highpass_hz",
                format!("must be >= 0 (got {})", self.options.acompcor.highpass_hz),
            ));
        }
        if !(0.0..=1.0).contains(&self.options.masks.binarize_thr) {
            return Err(invalid(
                "options.masks.binarize_thr",
                format!("must lie in [0, 1] (got {})", self.options.masks.binarize_thr),
            ));
        }
        if self.registration.enable && self.registration.levels == 0 {
            return Err(invalid("registration.levels", "must be >= 1".into()));
        }
        Ok(())
    }
}
