// crates/spineprep-confounds/src/pca.rs

//! Deterministic principal components for aCompCor.
//!
//! PCA runs on the T x T Gram matrix of the (column-centered) T x V
//! time-series matrix, eigendecomposed with cyclic Jacobi rotations:
//! fixed sweep order, fixed convergence threshold, no RNG. For identical
//! inputs the output is bit-identical.
//!
//! Sign rule: for each component, the voxel loading with the largest
//! absolute value must be positive; ties break toward the lowest voxel
//! index.

use ndarray::{Array1, Array2};

/// Relative eigenvalue tolerance below which a direction counts as null.
const RANK_TOL: f64 = 1e-10;

/// Maximum Jacobi sweeps (each sweep visits every off-diagonal pair once).
const MAX_SWEEPS: usize = 64;

/// PCA output.
#[derive(Clone, Debug, PartialEq)]
pub struct Pca {
    /// T x k component time series (orthonormal columns).
    pub components: Array2<f64>,
    /// Explained-variance ratio per component (length k, descending).
    pub explained_variance: Vec<f64>,
}

impl Pca {
    /// An empty decomposition (rank zero).
    #[must_use]
    pub fn empty(t: usize) -> Self {
        Self {
            components: Array2::zeros((t, 0)),
            explained_variance: Vec::new(),
        }
    }

    /// Component count.
    #[inline]
    #[must_use]
    pub fn n_components(&self) -> usize {
        self.components.ncols()
    }
}

/// Centered PCA of a T x V matrix, keeping at most `k_max` components
/// (and never more than the numerical rank).
#[must_use]
pub fn principal_components(x: &Array2<f64>, k_max: usize) -> Pca {
    let t = x.nrows();
    let v = x.ncols();
    if t == 0 || v == 0 || k_max == 0 {
        return Pca::empty(t);
    }

    // Center each column (voxel) over time.
    let mut xc = x.clone();
    for j in 0..v {
        let mean = xc.column(j).sum() / t as f64;
        for i in 0..t {
            xc[[i, j]] -= mean;
        }
    }

    // Gram matrix G = Xc * Xc^T (T x T, symmetric PSD).
    let gram = xc.dot(&xc.t());

    let (eigvals, eigvecs) = jacobi_eigh(&gram);

    // Order by descending eigenvalue; ties keep the lower original index.
    let mut order: Vec<usize> = (0..t).collect();
    order.sort_by(|&a, &b| {
        eigvals[b]
            .partial_cmp(&eigvals[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let total: f64 = eigvals.iter().filter(|&&l| l > 0.0).sum();
    if total <= 0.0 {
        return Pca::empty(t);
    }
    let lambda_max = eigvals[order[0]];

    let rank = order
        .iter()
        .filter(|&&i| eigvals[i] > RANK_TOL * lambda_max && eigvals[i] > 0.0)
        .count();
    let k = k_max.min(rank);
    if k == 0 {
        return Pca::empty(t);
    }

    let mut components = Array2::zeros((t, k));
    let mut explained = Vec::with_capacity(k);
    for (c, &ei) in order.iter().take(k).enumerate() {
        let mut u: Array1<f64> = eigvecs.column(ei).to_owned();

        // Sign normalization on the voxel loadings l = Xc^T u.
        let loadings = xc.t().dot(&u);
        let mut best = 0usize;
        let mut best_abs = -1.0;
        for (j, &l) in loadings.iter().enumerate() {
            if l.abs() > best_abs {
                best_abs = l.abs();
                best = j;
            }
        }
        if loadings[best] < 0.0 {
            u.mapv_inplace(|z| -z);
        }

        for i in 0..t {
            components[[i, c]] = u[i];
        }
        explained.push(eigvals[ei] / total);
    }

    Pca {
        components,
        explained_variance: explained,
    }
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvector `i` in column
/// `i`. Sweep order is row-major over the strict upper triangle, so the
/// result is deterministic for a given input.
pub(crate) fn jacobi_eigh(a: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut m = a.clone();
    let mut v: Array2<f64> = Array2::eye(n);

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += m[[p, q]] * m[[p, q]];
            }
        }
        if off.sqrt() < 1e-14 * (1.0 + frobenius(&m)) {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let app = m[[p, p]];
                let aqq = m[[q, q]];
                let theta = (aqq - app) / (2.0 * apq);
                let t_val = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t_val * t_val + 1.0).sqrt();
                let s = t_val * c;

                for i in 0..n {
                    let mip = m[[i, p]];
                    let miq = m[[i, q]];
                    m[[i, p]] = c * mip - s * miq;
                    m[[i, q]] = s * mip + c * miq;
                }
                for j in 0..n {
                    let mpj = m[[p, j]];
                    let mqj = m[[q, j]];
                    m[[p, j]] = c * mpj - s * mqj;
                    m[[q, j]] = s * mpj + c * mqj;
                }
                for i in 0..n {
                    let vip = v[[i, p]];
                    let viq = v[[i, q]];
                    v[[i, p]] = c * vip - s * viq;
                    v[[i, q]] = s * vip + c * viq;
                }
            }
        }
    }

    let eigvals = (0..n).map(|i| m[[i, i]]).collect();
    (eigvals, v)
}

fn frobenius(m: &Array2<f64>) -> f64 {
    m.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rank_one_matrix_yields_one_component() {
        // Every voxel is a scaled copy of the same time course.
        let base = [1.0, -2.0, 0.5, 3.0, -1.5];
        let mut x = Array2::zeros((5, 4));
        for j in 0..4 {
            for i in 0..5 {
                x[[i, j]] = base[i] * (j as f64 + 1.0);
            }
        }
        let pca = principal_components(&x, 5);
        assert_eq!(pca.n_components(), 1);
        assert!((pca.explained_variance[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn components_are_orthonormal() {
        let x = array![
            [1.0, 0.2, -0.5],
            [2.0, -0.3, 0.8],
            [-1.0, 0.9, 0.1],
            [0.5, -1.2, 0.4],
            [-2.5, 0.4, -0.8],
            [1.3, 0.1, 0.2],
        ];
        let pca = principal_components(&x, 3);
        let k = pca.n_components();
        assert!(k >= 2);
        for a in 0..k {
            for b in 0..k {
                let dot: f64 = (0..6)
                    .map(|i| pca.components[[i, a]] * pca.components[[i, b]])
                    .sum();
                let expect = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expect).abs() < 1e-8, "({a},{b}) dot = {dot}");
            }
        }
    }

    #[test]
    fn byte_identical_across_runs() {
        let x = array![
            [0.3, 1.2, -0.7, 2.2],
            [1.1, -0.4, 0.9, -1.0],
            [-0.8, 0.6, 1.4, 0.3],
            [2.0, -1.5, -0.2, 0.7],
            [-1.2, 0.8, 0.5, -0.9],
        ];
        let a = principal_components(&x, 3);
        let b = principal_components(&x, 3);
        assert_eq!(a.components, b.components);
        assert_eq!(a.explained_variance, b.explained_variance);
    }

    #[test]
    fn sign_rule_makes_largest_loading_positive() {
        let x = array![
            [1.0, 0.1],
            [2.0, 0.2],
            [-1.0, -0.1],
            [0.5, 0.05],
            [-2.5, -0.25],
        ];
        let pca = principal_components(&x, 1);
        assert_eq!(pca.n_components(), 1);

        // Recompute centered loadings and check the dominant one.
        let mut xc = x.clone();
        for j in 0..2 {
            let mean = xc.column(j).sum() / 5.0;
            for i in 0..5 {
                xc[[i, j]] -= mean;
            }
        }
        let u = pca.components.column(0).to_owned();
        let loadings = xc.t().dot(&u);
        let dominant = loadings
            .iter()
            .copied()
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap())
            .unwrap();
        assert!(dominant > 0.0);
    }

    #[test]
    fn zero_matrix_has_no_components() {
        let x = Array2::zeros((6, 10));
        let pca = principal_components(&x, 4);
        assert_eq!(pca.n_components(), 0);
        assert!(pca.explained_variance.is_empty());
    }

    #[test]
    fn k_capped_by_request_and_rank() {
        let x = array![
            [1.0, 0.0, 3.0],
            [0.0, 1.0, -1.0],
            [1.0, 1.0, 2.0],
            [2.0, -1.0, 0.5],
        ];
        let pca = principal_components(&x, 2);
        assert!(pca.n_components() <= 2);
    }
}
