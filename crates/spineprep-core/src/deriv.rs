// crates/spineprep-core/src/deriv.rs

//! Derivative path model.
//!
//! Pure composition from an entity tuple plus a descriptor (and optional
//! space label) to an output path under the derivatives root. The
//! composition is total and injective over valid inputs (alphanumeric
//! entity labels) and produces the same relative path on every platform;
//! the only I/O anywhere near this module is on-demand directory creation
//! at the commit boundary, which lives in [`crate::io`].

use crate::types::RunId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output space label.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Space {
    /// Subject-native functional space (no `space-` entity emitted).
    Native,
    /// PAM50 template space.
    Pam50,
}

impl Space {
    /// Entity value, if one is emitted.
    #[must_use]
    pub const fn label(self) -> Option<&'static str> {
        match self {
            Self::Native => None,
            Self::Pam50 => Some("PAM50"),
        }
    }
}

/// Derivative descriptor: selects the `desc-` token, the trailing suffix,
/// and the file extension.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Desc {
    /// Motion-corrected series (`desc-motion_bold.spv`).
    Motion,
    /// Motion-parameter table (`desc-motionparams_timeseries.tsv`).
    MotionParams,
    /// Motion-parameter metadata (`desc-motionparams_timeseries.json`).
    MotionParamsMeta,
    /// MP-PCA denoised series (`desc-mppca_bold.spv`).
    Mppca,
    /// Confounds table (`desc-confounds_timeseries.tsv`).
    Confounds,
    /// Confounds descriptor record (`desc-confounds_timeseries.json`).
    ConfoundsMeta,
    /// Temporal-crop sidecar (`desc-crop.json`).
    Crop,
    /// Cord mask (`desc-cordmask_mask.spv`).
    Cordmask,
    /// White-matter mask (`desc-wmmask_mask.spv`).
    Wmmask,
    /// CSF mask (`desc-csfmask_mask.spv`).
    Csfmask,
    /// Vertebral-label image (`desc-labels_dseg.spv`).
    Labels,
}

impl Desc {
    /// `desc-` entity value.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::MotionParams | Self::MotionParamsMeta => "motionparams",
            Self::Mppca => "mppca",
            Self::Confounds | Self::ConfoundsMeta => "confounds",
            Self::Crop => "crop",
            Self::Cordmask => "cordmask",
            Self::Wmmask => "wmmask",
            Self::Csfmask => "csfmask",
            Self::Labels => "labels",
        }
    }

    /// Trailing suffix + extension (empty suffix means none).
    #[must_use]
    pub const fn suffix_ext(self) -> (&'static str, &'static str) {
        match self {
            Self::Motion | Self::Mppca => ("bold", "spv"),
            Self::MotionParams | Self::Confounds => ("timeseries", "tsv"),
            Self::ConfoundsMeta | Self::MotionParamsMeta => ("timeseries", "json"),
            Self::Crop => ("", "json"),
            Self::Cordmask | Self::Wmmask | Self::Csfmask => ("mask", "spv"),
            Self::Labels => ("dseg", "spv"),
        }
    }

    /// Descriptor for a configured tissue-mask name, if recognized.
    #[must_use]
    pub fn for_tissue(tissue: &str) -> Option<Self> {
        match tissue {
            "cord" => Some(Self::Cordmask),
            "wm" => Some(Self::Wmmask),
            "csf" => Some(Self::Csfmask),
            _ => None,
        }
    }
}

/// Subject-level directory under the derivatives root:
/// `sub-<s>[/ses-<x>]`.
#[must_use]
pub fn subject_dir(root: &Path, subject: &str, session: Option<&str>) -> PathBuf {
    let mut p = root.join(format!("sub-{subject}"));
    if let Some(ses) = session {
        p.push(format!("ses-{ses}"));
    }
    p
}

/// Functional derivative path for one run:
/// `<root>/sub-<s>[/ses-<x>]/func/<runkey>[_space-<sp>]_desc-<d>[_<suffix>].<ext>`.
#[must_use]
pub fn func_path(root: &Path, id: &RunId, space: Space, desc: Desc) -> PathBuf {
    let mut name = id.key();
    if let Some(sp) = space.label() {
        name.push_str(&format!("_space-{sp}"));
    }
    name.push_str(&format!("_desc-{}", desc.token()));
    let (suffix, ext) = desc.suffix_ext();
    if !suffix.is_empty() {
        name.push_str(&format!("_{suffix}"));
    }
    name.push_str(&format!(".{ext}"));

    subject_dir(root, &id.subject, id.session.as_deref())
        .join("func")
        .join(name)
}

/// Anatomical derivative path:
/// `<root>/sub-<s>[/ses-<x>]/anat/sub-<s>[_ses-<x>][_space-<sp>]_desc-<d>[_<suffix>].<ext>`.
#[must_use]
pub fn anat_path(
    root: &Path,
    subject: &str,
    session: Option<&str>,
    space: Space,
    desc: Desc,
) -> PathBuf {
    let mut name = format!("sub-{subject}");
    if let Some(ses) = session {
        name.push_str(&format!("_ses-{ses}"));
    }
    if let Some(sp) = space.label() {
        name.push_str(&format!("_space-{sp}"));
    }
    name.push_str(&format!("_desc-{}", desc.token()));
    let (suffix, ext) = desc.suffix_ext();
    if !suffix.is_empty() {
        name.push_str(&format!("_{suffix}"));
    }
    name.push_str(&format!(".{ext}"));

    subject_dir(root, subject, session).join("anat").join(name)
}

/// Warp artifact under the `xfm/` sibling directory:
/// `<root>/sub-<s>[/ses-<x>]/xfm/sub-<s>[_ses-<x>]_from-native_to-<sp>_xfm.spv`.
#[must_use]
pub fn xfm_path(root: &Path, subject: &str, session: Option<&str>, to: Space) -> PathBuf {
    let to_label = to.label().unwrap_or("native");
    let mut name = format!("sub-{subject}");
    if let Some(ses) = session {
        name.push_str(&format!("_ses-{ses}"));
    }
    name.push_str(&format!("_from-native_to-{to_label}_xfm.spv"));
    subject_dir(root, subject, session).join("xfm").join(name)
}

/// Manifest CSV path under the derivatives root.
#[must_use]
pub fn manifest_path(root: &Path) -> PathBuf {
    root.join("manifest.csv")
}

/// Invocation lock file path under the derivatives root.
#[must_use]
pub fn lock_path(root: &Path) -> PathBuf {
    root.join(".lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> RunId {
        RunId {
            subject: "01".into(),
            session: None,
            task: "rest".into(),
            acquisition: None,
            run: 1,
        }
    }

    #[test]
    fn func_path_shape() {
        let p = func_path(Path::new("/deriv"), &rid(), Space::Native, Desc::Confounds);
        assert_eq!(
            p,
            PathBuf::from(
                "/deriv/sub-01/func/sub-01_task-rest_run-01_desc-confounds_timeseries.tsv"
            )
        );
    }

    #[test]
    fn space_entity_emitted_for_template() {
        let p = func_path(Path::new("/d"), &rid(), Space::Pam50, Desc::Motion);
        assert!(p
            .to_string_lossy()
            .ends_with("sub-01_task-rest_run-01_space-PAM50_desc-motion_bold.spv"));
    }

    #[test]
    fn crop_has_no_suffix() {
        let p = func_path(Path::new("/d"), &rid(), Space::Native, Desc::Crop);
        assert!(p.to_string_lossy().ends_with("_desc-crop.json"));
    }

    #[test]
    fn session_nests_directory_and_name() {
        let mut id = rid();
        id.session = Some("pre".into());
        let p = func_path(Path::new("/d"), &id, Space::Native, Desc::Crop);
        assert_eq!(
            p,
            PathBuf::from("/d/sub-01/ses-pre/func/sub-01_ses-pre_task-rest_run-01_desc-crop.json")
        );
    }

    #[test]
    fn xfm_lives_in_sibling_dir() {
        let p = xfm_path(Path::new("/d"), "01", None, Space::Pam50);
        assert_eq!(
            p,
            PathBuf::from("/d/sub-01/xfm/sub-01_from-native_to-PAM50_xfm.spv")
        );
    }

    #[test]
    fn composition_is_idempotent() {
        let a = func_path(Path::new("/d"), &rid(), Space::Native, Desc::Confounds);
        let b = func_path(Path::new("/d"), &rid(), Space::Native, Desc::Confounds);
        assert_eq!(a, b);
    }
}
