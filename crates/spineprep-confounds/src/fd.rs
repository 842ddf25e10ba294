// crates/spineprep-confounds/src/fd.rs

//! Framewise displacement (Power method).
//!
//! `FD_t = |Δtx| + |Δty| + |Δtz| + r · (|Δrx| + |Δry| + |Δrz|)` with
//! rotations in radians converted to millimeters of arc on a sphere of
//! radius `r`. `FD_0 = 0` by definition; first-order differences only.

use spineprep_core::MotionParams;

/// Rotation-to-arc conversion radius in millimeters.
pub const FD_RADIUS_MM: f64 = 50.0;

/// Power framewise displacement, one value per row of `params`.
#[must_use]
pub fn framewise_displacement(params: &MotionParams) -> Vec<f64> {
    framewise_displacement_with_radius(params, FD_RADIUS_MM)
}

/// FD with an explicit conversion radius.
#[must_use]
pub fn framewise_displacement_with_radius(params: &MotionParams, radius_mm: f64) -> Vec<f64> {
    let t = params.len();
    let mut fd = vec![0.0; t];
    for i in 1..t {
        let prev = &params.rows[i - 1];
        let cur = &params.rows[i];
        let trans: f64 = (0..3).map(|c| (cur[c] - prev[c]).abs()).sum();
        let rot: f64 = (3..6).map(|c| (cur[c] - prev[c]).abs()).sum();
        fd[i] = trans + radius_mm * rot;
    }
    fd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_is_zero_for_still_params() {
        let fd = framewise_displacement(&MotionParams::zeros(5));
        assert_eq!(fd, vec![0.0; 5]);
    }

    #[test]
    fn unit_translation_yields_unit_fd() {
        // A 1 mm step in x between frames 1 and 2 that then persists:
        // only the step itself registers.
        let mut p = MotionParams::zeros(4);
        p.rows[2][0] = 1.0;
        p.rows[3][0] = 1.0;
        let fd = framewise_displacement(&p);
        assert_eq!(fd, vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn rotations_scale_by_radius() {
        let mut p = MotionParams::zeros(2);
        p.rows[1][3] = 0.01; // 0.01 rad about x
        let fd = framewise_displacement(&p);
        assert!((fd[1] - 0.5).abs() < 1e-12);
    }
}
