// crates/spineprep-confounds/src/mppca.rs

//! Marchenko-Pastur PCA denoise (whole-series variant).
//!
//! The T x V series matrix is centered per voxel and eigendecomposed via
//! the same deterministic Jacobi solver PCA uses. The signal/noise split
//! walks the spectrum from the top: components are kept while the largest
//! remaining eigenvalue exceeds the MP bulk edge estimated from the
//! eigenvalues below it. Sub-edge components are zeroed and the series
//! reconstructed. Deterministic end to end.

use crate::pca::jacobi_eigh;
use ndarray::Array2;
use spineprep_core::Volume4;
use tracing::debug;

/// Denoise outcome.
#[derive(Clone, Debug)]
pub struct MppcaResult {
    /// Reconstructed series.
    pub denoised: Volume4,
    /// Number of signal components kept.
    pub n_signal: usize,
    /// Estimated noise variance of the discarded bulk.
    pub sigma2: f64,
}

/// Denoise a 4-D series. Series too short to split (fewer than 3 volumes)
/// are returned unchanged with `n_signal` equal to the volume count.
#[must_use]
pub fn mppca_denoise(vol: &Volume4) -> MppcaResult {
    let t = vol.nvols();
    let v = vol.nvox();
    if t < 3 || v == 0 {
        return MppcaResult {
            denoised: vol.clone(),
            n_signal: t,
            sigma2: 0.0,
        };
    }

    // T x V matrix, centered per voxel.
    let mut x = Array2::zeros((t, v));
    for (i, row) in x.rows_mut().into_iter().enumerate() {
        let samples = vol.vol(i);
        for (j, cell) in row.into_iter().enumerate() {
            *cell = f64::from(samples[j]);
        }
    }
    let mut means = vec![0.0f64; v];
    for j in 0..v {
        means[j] = x.column(j).sum() / t as f64;
        for i in 0..t {
            x[[i, j]] -= means[j];
        }
    }

    let gram = x.dot(&x.t());
    let (eigvals, eigvecs) = jacobi_eigh(&gram);

    let mut order: Vec<usize> = (0..t).collect();
    order.sort_by(|&a, &b| {
        eigvals[b]
            .partial_cmp(&eigvals[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let lam: Vec<f64> = order
        .iter()
        .map(|&i| (eigvals[i] / v as f64).max(0.0))
        .collect();

    let (n_signal, sigma2) = split_spectrum(&lam, v);
    if n_signal == t {
        return MppcaResult {
            denoised: vol.clone(),
            n_signal,
            sigma2,
        };
    }

    // Reconstruct with the kept subspace: X' = U_p U_p^T X.
    let mut u_p = Array2::zeros((t, n_signal));
    for (c, &ei) in order.iter().take(n_signal).enumerate() {
        for i in 0..t {
            u_p[[i, c]] = eigvecs[[i, ei]];
        }
    }
    let projected = u_p.dot(&u_p.t()).dot(&x);

    let mut data = vec![0.0f32; t * v];
    for i in 0..t {
        for j in 0..v {
            data[i * v + j] = (projected[[i, j]] + means[j]) as f32;
        }
    }

    debug!(n_signal, sigma2, "mppca denoise complete");
    MppcaResult {
        denoised: Volume4 {
            shape: vol.shape,
            voxel_dims_mm: vol.voxel_dims_mm,
            tr_s: vol.tr_s,
            data,
        },
        n_signal,
        sigma2,
    }
}

/// Walk the descending spectrum, growing the signal set while the largest
/// remaining eigenvalue exceeds the MP bulk edge of the eigenvalues below
/// it. Returns `(n_signal, sigma2)`.
fn split_spectrum(lam: &[f64], v: usize) -> (usize, f64) {
    let t = lam.len();
    for p in 0..t {
        let bulk = &lam[p..];
        let sigma2 = bulk.iter().sum::<f64>() / bulk.len() as f64;
        if sigma2 <= 0.0 {
            return (p, 0.0);
        }
        let gamma = bulk.len() as f64 / v as f64;
        let edge = sigma2 * (1.0 + gamma.sqrt()).powi(2);
        if lam[p] <= edge {
            return (p, sigma2);
        }
    }
    (t, 0.0)
}
