// crates/spineprep-confounds/src/acompcor.rs

//! Anatomical-component (aCompCor) regressors.
//!
//! Per configured tissue: extract the T x V time-series matrix over the
//! mask voxels, optionally detrend / high-pass / standardize, then run the
//! deterministic PCA of [`crate::pca`]. An empty mask (or a rank-zero
//! matrix) yields zero components rather than an error.

use crate::filter::highpass_columns;
use crate::pca::{principal_components, Pca};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use spineprep_core::{ACompCor, Mask3, Volume4};
use tracing::debug;

/// Per-tissue aCompCor result.
#[derive(Clone, Debug, PartialEq)]
pub struct TissueComponents {
    /// Tissue name as configured (e.g. `cord`).
    pub tissue: String,
    /// Mask voxel count used for extraction.
    pub n_voxels: usize,
    /// The decomposition (possibly empty).
    pub pca: Pca,
}

/// Per-tissue metadata recorded in the confounds descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TissueMeta {
    /// Component count emitted.
    pub n_components: usize,
    /// Explained-variance ratio per component.
    pub explained_variance: Vec<f64>,
    /// Mask voxel count.
    pub n_voxels: usize,
}

impl TissueComponents {
    /// Metadata view for the descriptor.
    #[must_use]
    pub fn meta(&self) -> TissueMeta {
        TissueMeta {
            n_components: self.pca.n_components(),
            explained_variance: self.pca.explained_variance.clone(),
            n_voxels: self.n_voxels,
        }
    }
}

/// Compute aCompCor components for one tissue.
#[must_use]
pub fn acompcor_tissue(
    tissue: &str,
    vol: &Volume4,
    mask: Option<&Mask3>,
    cfg: &ACompCor,
) -> TissueComponents {
    let t = vol.nvols();
    let indices = mask.map(Mask3::indices).unwrap_or_default();
    if indices.is_empty() {
        debug!(tissue, "empty mask, zero components");
        return TissueComponents {
            tissue: tissue.to_string(),
            n_voxels: 0,
            pca: Pca::empty(t),
        };
    }

    // T x V extraction.
    let mut x = Array2::zeros((t, indices.len()));
    for (i, row) in x.rows_mut().into_iter().enumerate() {
        let v = vol.vol(i);
        for (j, cell) in row.into_iter().enumerate() {
            *cell = f64::from(v[indices[j]]);
        }
    }

    if cfg.detrend {
        detrend_columns(&mut x);
    }
    if cfg.highpass_hz > 0.0 {
        highpass_columns(&mut x, cfg.highpass_hz, vol.tr_s);
    }
    if cfg.standardize {
        standardize_columns(&mut x);
    }

    let pca = principal_components(&x, cfg.n_components_per_tissue);
    debug!(
        tissue,
        n_voxels = indices.len(),
        n_components = pca.n_components(),
        "acompcor tissue done"
    );
    TissueComponents {
        tissue: tissue.to_string(),
        n_voxels: indices.len(),
        pca,
    }
}

/// Remove the least-squares line from each column.
fn detrend_columns(x: &mut Array2<f64>) {
    let t = x.nrows();
    if t < 2 {
        return;
    }
    let tf = t as f64;
    let mean_i = (tf - 1.0) / 2.0;
    let denom: f64 = (0..t).map(|i| (i as f64 - mean_i).powi(2)).sum();

    for j in 0..x.ncols() {
        let mean_y = x.column(j).sum() / tf;
        let slope: f64 = (0..t)
            .map(|i| (i as f64 - mean_i) * (x[[i, j]] - mean_y))
            .sum::<f64>()
            / denom;
        for i in 0..t {
            x[[i, j]] -= mean_y + slope * (i as f64 - mean_i);
        }
    }
}

/// Z-score each column; constant columns flatten to zero.
fn standardize_columns(x: &mut Array2<f64>) {
    let t = x.nrows();
    if t == 0 {
        return;
    }
    let tf = t as f64;
    for j in 0..x.ncols() {
        let mean = x.column(j).sum() / tf;
        let var: f64 = x.column(j).iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / tf;
        let sd = var.sqrt();
        for i in 0..t {
            x[[i, j]] = if sd > 0.0 { (x[[i, j]] - mean) / sd } else { 0.0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spineprep_core::synth::{constant_series, full_mask, noisy_series};

    fn cfg(k: usize) -> ACompCor {
        ACompCor {
            enable: true,
            tissues: vec!["cord".into()],
            n_components_per_tissue: k,
            highpass_hz: 0.0,
            detrend: true,
            standardize: true,
        }
    }

    #[test]
    fn empty_mask_yields_zero_components() {
        let vol = noisy_series([4, 4, 2, 6], 11, 2.0);
        let empty = Mask3::zeros_like(&vol);
        let tc = acompcor_tissue("cord", &vol, Some(&empty), &cfg(5));
        assert_eq!(tc.pca.n_components(), 0);
        assert!(tc.pca.explained_variance.is_empty());
        assert_eq!(tc.n_voxels, 0);
    }

    #[test]
    fn missing_mask_behaves_like_empty() {
        let vol = noisy_series([4, 4, 2, 6], 11, 2.0);
        let tc = acompcor_tissue("wm", &vol, None, &cfg(5));
        assert_eq!(tc.pca.n_components(), 0);
    }

    #[test]
    fn constant_series_has_rank_zero() {
        let vol = constant_series([4, 4, 2, 6], 50.0, 2.0);
        let mask = full_mask(&vol);
        let tc = acompcor_tissue("cord", &vol, Some(&mask), &cfg(5));
        assert_eq!(tc.pca.n_components(), 0);
        assert_eq!(tc.n_voxels, vol.nvox());
    }

    #[test]
    fn noisy_series_yields_components() {
        let vol = noisy_series([4, 4, 2, 8], 3, 2.0);
        let mask = full_mask(&vol);
        let tc = acompcor_tissue("cord", &vol, Some(&mask), &cfg(3));
        assert_eq!(tc.pca.n_components(), 3);
        assert_eq!(tc.pca.components.nrows(), 8);
        // Explained variance is descending.
        let ev = &tc.pca.explained_variance;
        assert!(ev.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn detrend_removes_linear_drift() {
        let mut x = Array2::zeros((6, 1));
        for i in 0..6 {
            x[[i, 0]] = 2.0 * i as f64 + 1.0;
        }
        detrend_columns(&mut x);
        for i in 0..6 {
            assert!(x[[i, 0]].abs() < 1e-10);
        }
    }
}
