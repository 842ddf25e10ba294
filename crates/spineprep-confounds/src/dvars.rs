// crates/spineprep-confounds/src/dvars.rs

//! DVARS: root-mean-square of the volumewise temporal derivative.
//!
//! Mask precedence: provided tissue mask, else voxels above the median of
//! the first volume, else the whole field of view. The chosen candidate set
//! is then restricted to voxels with finite values and non-zero temporal
//! variance. `DVARS_0 = 0` by definition.

use serde::{Deserialize, Serialize};
use spineprep_core::{Mask3, PipelineError, Volume4};

/// Which voxel set DVARS was computed over (recorded in the descriptor).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DvarsMask {
    /// A provided tissue mask.
    Provided,
    /// Voxels above the median of the first volume.
    MedianFirstVolume,
    /// Whole field of view.
    Fov,
}

/// DVARS vector plus the mask provenance.
#[derive(Clone, Debug, PartialEq)]
pub struct Dvars {
    /// One value per volume; `values[0] == 0`.
    pub values: Vec<f64>,
    /// Which candidate set was used.
    pub mask: DvarsMask,
    /// Voxel count after the finite/variance restriction.
    pub n_voxels: usize,
}

/// Compute DVARS over `vol`, honoring the mask precedence above.
///
/// # Errors
/// Returns [`PipelineError::NumericalDegenerate`] when no usable voxels
/// remain; the caller degrades to a zero vector and records the error.
pub fn dvars(vol: &Volume4, mask: Option<&Mask3>) -> Result<Dvars, PipelineError> {
    let t = vol.nvols();
    if t == 0 {
        return Err(PipelineError::NumericalDegenerate {
            what: "dvars".into(),
            message: "series has zero volumes".into(),
        });
    }

    let (candidates, which) = candidate_voxels(vol, mask);
    let usable = restrict_usable(vol, &candidates);
    if usable.is_empty() {
        // A constant image has no voxel with temporal variance; that is a
        // well-defined all-zero DVARS, not a degeneracy.
        if t >= 1 && !candidates.is_empty() {
            return Ok(Dvars {
                values: vec![0.0; t],
                mask: which,
                n_voxels: 0,
            });
        }
        return Err(PipelineError::NumericalDegenerate {
            what: "dvars".into(),
            message: "no usable voxels after finite/variance restriction".into(),
        });
    }

    let mut values = vec![0.0; t];
    for i in 1..t {
        let prev = vol.vol(i - 1);
        let cur = vol.vol(i);
        let sum_sq: f64 = usable
            .iter()
            .map(|&v| {
                let d = f64::from(cur[v]) - f64::from(prev[v]);
                d * d
            })
            .sum();
        values[i] = (sum_sq / usable.len() as f64).sqrt();
    }

    Ok(Dvars {
        values,
        mask: which,
        n_voxels: usable.len(),
    })
}

/// Candidate voxel set per the mask precedence rule.
fn candidate_voxels(vol: &Volume4, mask: Option<&Mask3>) -> (Vec<usize>, DvarsMask) {
    if let Some(m) = mask {
        let idx = m.indices();
        if !idx.is_empty() {
            return (idx, DvarsMask::Provided);
        }
    }

    // Default: voxels above the median of the first volume.
    let first = vol.vol(0);
    let mut sorted: Vec<f32> = first.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f32::total_cmp);
    if !sorted.is_empty() {
        let median = sorted[sorted.len() / 2];
        let idx: Vec<usize> = first
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| (v > median).then_some(i))
            .collect();
        if !idx.is_empty() {
            return (idx, DvarsMask::MedianFirstVolume);
        }
    }

    ((0..vol.nvox()).collect(), DvarsMask::Fov)
}

/// Restrict to voxels with finite values across time and non-zero temporal
/// variance.
fn restrict_usable(vol: &Volume4, candidates: &[usize]) -> Vec<usize> {
    let t = vol.nvols();
    candidates
        .iter()
        .copied()
        .filter(|&v| {
            let first = vol.vol(0)[v];
            if !first.is_finite() {
                return false;
            }
            let mut varies = false;
            for i in 1..t {
                let x = vol.vol(i)[v];
                if !x.is_finite() {
                    return false;
                }
                if x != first {
                    varies = true;
                }
            }
            varies
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spineprep_core::synth::{constant_series, full_mask, series_with_jump};

    #[test]
    fn constant_series_has_zero_dvars() {
        let vol = constant_series([4, 4, 2, 5], 100.0, 2.0);
        let d = dvars(&vol, None).unwrap();
        assert_eq!(d.values, vec![0.0; 5]);
    }

    #[test]
    fn persisting_unit_step_registers_once() {
        // A unit step between frames 1 and 2 that then persists: only the
        // transition itself registers, everything else stays zero.
        let mut vol = constant_series([4, 4, 2, 5], 100.0, 2.0);
        let n = vol.nvox();
        for v in &mut vol.data[2 * n..] {
            *v += 1.0;
        }
        let mask = full_mask(&vol);
        let d = dvars(&vol, Some(&mask)).unwrap();
        assert_eq!(d.values[0], 0.0);
        assert_eq!(d.values[1], 0.0);
        assert!((d.values[2] - 1.0).abs() < 1e-9);
        assert_eq!(d.values[3], 0.0);
        assert_eq!(d.values[4], 0.0);
    }

    #[test]
    fn single_jump_registers_twice_nonzero_only_at_edges_of_jump() {
        // Unit jump at volume 2: the derivative is non-zero entering (t=2)
        // and leaving (t=3) the jumped frame.
        let vol = series_with_jump([4, 4, 2, 5], 2, 1.0, 2.0);
        let mask = full_mask(&vol);
        let d = dvars(&vol, Some(&mask)).unwrap();
        assert_eq!(d.mask, DvarsMask::Provided);
        assert_eq!(d.values[0], 0.0);
        assert_eq!(d.values[1], 0.0);
        assert!(d.values[2] > 0.0);
        assert!(d.values[3] > 0.0);
        assert_eq!(d.values[4], 0.0);
        // Every usable voxel jumps by exactly 1.
        assert!((d.values[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_mask_falls_back_to_default() {
        let vol = series_with_jump([4, 4, 2, 4], 1, 1.0, 2.0);
        let empty = spineprep_core::Mask3::zeros_like(&vol);
        let d = dvars(&vol, Some(&empty)).unwrap();
        // Constant first volume: no voxel is above the median, so the
        // whole FOV is used.
        assert_eq!(d.mask, DvarsMask::Fov);
    }

    #[test]
    fn zero_volume_series_is_degenerate() {
        let vol = Volume4 {
            shape: [2, 2, 1, 0],
            voxel_dims_mm: [1.0; 3],
            tr_s: 2.0,
            data: vec![],
        };
        let err = dvars(&vol, None).unwrap_err();
        assert_eq!(err.kind(), "numerical-degenerate");
    }
}
