// crates/spineprep-core/src/synth.rs

//! Deterministic synthetic data for tests and benchmarks.
//!
//! Everything here is seeded (`StdRng::seed_from_u64`) so fixtures are
//! byte-identical across runs.

#![allow(clippy::cast_precision_loss)]

use crate::types::{RunId, RunRecord};
use crate::volume::{Mask3, Volume4};
use anyhow::Result;
use rand::{rngs::StdRng, Rng as _, SeedableRng};
use std::path::Path;

/// A constant-valued series (DVARS must be zero everywhere on this).
#[must_use]
pub fn constant_series(shape: [usize; 4], value: f32, tr_s: f64) -> Volume4 {
    let n = shape.iter().product();
    Volume4 {
        shape,
        voxel_dims_mm: [1.0, 1.0, 5.0],
        tr_s,
        data: vec![value; n],
    }
}

/// A constant series with a single-frame unit jump at volume `t_jump`.
#[must_use]
pub fn series_with_jump(shape: [usize; 4], t_jump: usize, delta: f32, tr_s: f64) -> Volume4 {
    let mut vol = constant_series(shape, 100.0, tr_s);
    let n = vol.nvox();
    for v in &mut vol.data[t_jump * n..(t_jump + 1) * n] {
        *v += delta;
    }
    vol
}

/// A seeded noisy series around a constant baseline.
#[must_use]
pub fn noisy_series(shape: [usize; 4], seed: u64, tr_s: f64) -> Volume4 {
    let mut rng = StdRng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    let data = (0..n)
        .map(|_| 100.0 + rng.random_range(-1.0f32..1.0f32))
        .collect();
    Volume4 {
        shape,
        voxel_dims_mm: [1.0, 1.0, 5.0],
        tr_s,
        data,
    }
}

/// A full mask (every voxel active) matching `vol`'s spatial shape.
#[must_use]
pub fn full_mask(vol: &Volume4) -> Mask3 {
    let mut m = Mask3::zeros_like(vol);
    for v in &mut m.data {
        *v = 1.0;
    }
    m
}

/// Write a one-subject, one-run dataset under `bids_dir` and return its
/// run record. The image is a constant 6x6x3 series with `nvols` volumes.
///
/// # Errors
/// Fails if the image cannot be written.
pub fn write_tiny_dataset(bids_dir: &Path, nvols: usize) -> Result<RunRecord> {
    let func_dir = bids_dir.join("sub-01").join("func");
    std::fs::create_dir_all(&func_dir)?;
    let bold_path = func_dir.join("sub-01_task-rest_run-01_bold.spv");

    let vol = constant_series([6, 6, 3, nvols], 100.0, 2.0);
    vol.write(&bold_path)?;

    Ok(RunRecord {
        id: RunId {
            subject: "01".into(),
            session: None,
            task: "rest".into(),
            acquisition: None,
            run: 1,
        },
        bold_path,
        tr_s: 2.0,
        pe_dir: Some("AP".into()),
        voxel_dims_mm: [1.0, 1.0, 5.0],
        nvols,
        motion_group: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noisy_series_is_seed_deterministic() {
        let a = noisy_series([4, 4, 2, 3], 7, 2.0);
        let b = noisy_series([4, 4, 2, 3], 7, 2.0);
        assert_eq!(a, b);
        let c = noisy_series([4, 4, 2, 3], 8, 2.0);
        assert_ne!(a, c);
    }

    #[test]
    fn jump_series_differs_only_at_the_jump() {
        let v = series_with_jump([2, 2, 1, 4], 2, 5.0, 2.0);
        assert_eq!(v.vol(0), v.vol(1));
        assert_ne!(v.vol(1), v.vol(2));
        assert_eq!(v.vol(0), v.vol(3));
    }

    #[test]
    fn tiny_dataset_written_and_readable() {
        let dir = tempfile::TempDir::new().unwrap();
        let rec = write_tiny_dataset(dir.path(), 4).unwrap();
        assert!(rec.bold_path.is_file());
        let vol = Volume4::read(&rec.bold_path).unwrap();
        assert_eq!(vol.shape, [6, 6, 3, 4]);
    }
}
