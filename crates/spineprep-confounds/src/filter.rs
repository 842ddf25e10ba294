// crates/spineprep-confounds/src/filter.rs

//! Order-2 Butterworth high-pass, applied forward-backward per voxel.
//!
//! Coefficients come from the bilinear transform of the analog prototype;
//! the forward-backward (filtfilt) pass gives zero phase distortion, which
//! matters because the filtered series feeds PCA. No state is carried
//! between voxels and no RNG is involved, so the output is deterministic.

use ndarray::Array2;

/// Biquad coefficients (direct form II transposed, `a0` normalized to 1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// High-pass design at `cutoff_hz` for sampling period `tr_s`.
    ///
    /// Returns `None` when the cutoff is non-positive or at/above Nyquist
    /// (the filter degenerates to identity / is unrealizable).
    #[must_use]
    pub fn highpass(cutoff_hz: f64, tr_s: f64) -> Option<Self> {
        if cutoff_hz <= 0.0 || tr_s <= 0.0 {
            return None;
        }
        let nyquist = 0.5 / tr_s;
        if cutoff_hz >= nyquist {
            return None;
        }

        let k = (std::f64::consts::PI * cutoff_hz * tr_s).tan();
        let sqrt2 = std::f64::consts::SQRT_2;
        let norm = 1.0 / (1.0 + sqrt2 * k + k * k);
        Some(Self {
            b0: norm,
            b1: -2.0 * norm,
            b2: norm,
            a1: 2.0 * (k * k - 1.0) * norm,
            a2: (1.0 - sqrt2 * k + k * k) * norm,
        })
    }

    /// Single forward pass over `x`, in place.
    fn run(&self, x: &mut [f64]) {
        let mut z1 = 0.0;
        let mut z2 = 0.0;
        for v in x.iter_mut() {
            let input = *v;
            let out = self.b0 * input + z1;
            z1 = self.b1 * input + z2 - self.a1 * out;
            z2 = self.b2 * input - self.a2 * out;
            *v = out;
        }
    }

    /// Forward-backward pass over `x`, in place (zero phase).
    pub fn filtfilt(&self, x: &mut [f64]) {
        self.run(x);
        x.reverse();
        self.run(x);
        x.reverse();
    }
}

/// High-pass every column of a T x V matrix in place.
///
/// A cutoff of 0 (or one at/above Nyquist) leaves the data untouched and
/// returns `false`; otherwise returns `true`.
pub fn highpass_columns(data: &mut Array2<f64>, cutoff_hz: f64, tr_s: f64) -> bool {
    let Some(bq) = Biquad::highpass(cutoff_hz, tr_s) else {
        return false;
    };
    let t = data.nrows();
    let mut col = vec![0.0; t];
    for j in 0..data.ncols() {
        for (i, c) in col.iter_mut().enumerate() {
            *c = data[[i, j]];
        }
        bq.filtfilt(&mut col);
        for (i, &c) in col.iter().enumerate() {
            data[[i, j]] = c;
        }
    }
    true
}
