// crates/spineprep-core/src/volume.rs

//! Compact volume container (`.spv`).
//!
//! Layout: one CBOR-encoded [`SpvHeader`] followed by raw little-endian
//! `f32` samples in x-fastest order. The header is a single CBOR item, so
//! header-only reads (discovery needs shape and TR, not data) stop after
//! the first item without touching the payload.
//!
//! NIfTI conversion belongs to the external-tool wrappers; the core only
//! ever consumes shape, voxel dimensions, TR, and samples, all of which
//! this container preserves.

use crate::error::{PipelineError, PipelineResult};
use crate::io::atomic_write_bytes;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Container format version.
pub const SPV_VERSION: u16 = 1;

/// Extension used by the container.
pub const SPV_EXT: &str = "spv";

/// Serialized header preceding the sample payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpvHeader {
    /// Format version tag.
    pub version: u16,
    /// Dimensions, x-fastest; length 3 (mask) or 4 (series).
    pub shape: Vec<u64>,
    /// Voxel dimensions in millimeters.
    pub voxel_dims_mm: [f32; 3],
    /// Repetition time in seconds (None for masks / 3-D images).
    pub tr_s: Option<f64>,
}

impl SpvHeader {
    /// Total sample count implied by `shape`.
    #[must_use]
    pub fn nsamples(&self) -> usize {
        self.shape.iter().product::<u64>() as usize
    }
}

/// A 4-D functional series, x-fastest sample order.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume4 {
    /// `[nx, ny, nz, nt]`.
    pub shape: [usize; 4],
    /// Voxel dimensions in millimeters.
    pub voxel_dims_mm: [f32; 3],
    /// Repetition time in seconds.
    pub tr_s: f64,
    /// Samples, volume-major: `data[t * nvox + (z*ny + y)*nx + x]`.
    pub data: Vec<f32>,
}

impl Volume4 {
    /// Construct, validating that `data` matches `shape`.
    ///
    /// # Errors
    /// Fails if the sample count does not match the shape.
    pub fn new(
        shape: [usize; 4],
        voxel_dims_mm: [f32; 3],
        tr_s: f64,
        data: Vec<f32>,
    ) -> Result<Self> {
        let expect = shape.iter().product::<usize>();
        if data.len() != expect {
            bail!(
                "sample count {} does not match shape {:?} (expected {})",
                data.len(),
                shape,
                expect
            );
        }
        Ok(Self {
            shape,
            voxel_dims_mm,
            tr_s,
            data,
        })
    }

    /// Volume count.
    #[inline]
    #[must_use]
    pub const fn nvols(&self) -> usize {
        self.shape[3]
    }

    /// Voxels per volume.
    #[inline]
    #[must_use]
    pub const fn nvox(&self) -> usize {
        self.shape[0] * self.shape[1] * self.shape[2]
    }

    /// Samples of volume `t`.
    ///
    /// # Panics
    /// Panics if `t >= nvols()`.
    #[inline]
    #[must_use]
    pub fn vol(&self, t: usize) -> &[f32] {
        let n = self.nvox();
        &self.data[t * n..(t + 1) * n]
    }

    /// Copy of the `[from, to)` temporal window.
    ///
    /// # Errors
    /// Fails if the bounds violate `from <= to <= nvols`.
    pub fn crop_time(&self, from: usize, to: usize) -> Result<Self> {
        if from > to || to > self.nvols() {
            bail!(
                "crop bounds [{from}, {to}) invalid for {} volumes",
                self.nvols()
            );
        }
        let n = self.nvox();
        let data = self.data[from * n..to * n].to_vec();
        Self::new(
            [self.shape[0], self.shape[1], self.shape[2], to - from],
            self.voxel_dims_mm,
            self.tr_s,
            data,
        )
    }

    /// Per-volume mean over `mask` voxels, or the whole FOV if `mask` is
    /// `None` or selects no voxels.
    #[must_use]
    pub fn volume_means(&self, mask: Option<&Mask3>) -> Vec<f64> {
        let idx: Option<Vec<usize>> = mask.map(Mask3::indices).filter(|v| !v.is_empty());
        (0..self.nvols())
            .map(|t| {
                let v = self.vol(t);
                match &idx {
                    Some(ix) => {
                        ix.iter().map(|&i| f64::from(v[i])).sum::<f64>() / ix.len() as f64
                    }
                    None => v.iter().map(|&x| f64::from(x)).sum::<f64>() / v.len() as f64,
                }
            })
            .collect()
    }

    /// Commit the series to `path` atomically.
    ///
    /// # Errors
    /// Fails on serialization or commit errors.
    pub fn write(&self, path: &Path) -> PipelineResult<()> {
        let header = SpvHeader {
            version: SPV_VERSION,
            shape: self.shape.iter().map(|&d| d as u64).collect(),
            voxel_dims_mm: self.voxel_dims_mm,
            tr_s: Some(self.tr_s),
        };
        atomic_write_bytes(path, &encode(&header, &self.data, path)?)
    }

    /// Read a series from `path`.
    ///
    /// # Errors
    /// Fails if the file is missing, malformed, or not 4-D.
    pub fn read(path: &Path) -> Result<Self> {
        let (header, data) = decode(path)?;
        if header.shape.len() != 4 {
            bail!(
                "{} is {}-D, expected a 4-D series",
                path.display(),
                header.shape.len()
            );
        }
        let shape = [
            header.shape[0] as usize,
            header.shape[1] as usize,
            header.shape[2] as usize,
            header.shape[3] as usize,
        ];
        Self::new(
            shape,
            header.voxel_dims_mm,
            header.tr_s.unwrap_or(1.0),
            data,
        )
    }
}

/// A 3-D mask or anatomical image.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask3 {
    /// `[nx, ny, nz]`.
    pub shape: [usize; 3],
    /// Voxel dimensions in millimeters.
    pub voxel_dims_mm: [f32; 3],
    /// Samples, x-fastest.
    pub data: Vec<f32>,
}

impl Mask3 {
    /// Construct, validating that `data` matches `shape`.
    ///
    /// # Errors
    /// Fails if the sample count does not match the shape.
    pub fn new(shape: [usize; 3], voxel_dims_mm: [f32; 3], data: Vec<f32>) -> Result<Self> {
        let expect = shape.iter().product::<usize>();
        if data.len() != expect {
            bail!(
                "sample count {} does not match shape {:?} (expected {})",
                data.len(),
                shape,
                expect
            );
        }
        Ok(Self {
            shape,
            voxel_dims_mm,
            data,
        })
    }

    /// All-zero mask with the spatial shape of `vol`.
    #[must_use]
    pub fn zeros_like(vol: &Volume4) -> Self {
        Self {
            shape: [vol.shape[0], vol.shape[1], vol.shape[2]],
            voxel_dims_mm: vol.voxel_dims_mm,
            data: vec![0.0; vol.nvox()],
        }
    }

    /// Linear indices of voxels strictly above 0.5 (binary convention).
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| (v > 0.5).then_some(i))
            .collect()
    }

    /// In-place binarization at `thr` (values > thr become 1, else 0).
    pub fn binarize(&mut self, thr: f64) {
        for v in &mut self.data {
            *v = if f64::from(*v) > thr { 1.0 } else { 0.0 };
        }
    }

    /// Count of voxels strictly above 0.5.
    #[must_use]
    pub fn n_active(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0.5).count()
    }

    /// Commit the mask to `path` atomically.
    ///
    /// # Errors
    /// Fails on serialization or commit errors.
    pub fn write(&self, path: &Path) -> PipelineResult<()> {
        let header = SpvHeader {
            version: SPV_VERSION,
            shape: self.shape.iter().map(|&d| d as u64).collect(),
            voxel_dims_mm: self.voxel_dims_mm,
            tr_s: None,
        };
        atomic_write_bytes(path, &encode(&header, &self.data, path)?)
    }

    /// Read a mask from `path`.
    ///
    /// # Errors
    /// Fails if the file is missing, malformed, or not 3-D.
    pub fn read(path: &Path) -> Result<Self> {
        let (header, data) = decode(path)?;
        if header.shape.len() != 3 {
            bail!(
                "{} is {}-D, expected a 3-D mask",
                path.display(),
                header.shape.len()
            );
        }
        Self::new(
            [
                header.shape[0] as usize,
                header.shape[1] as usize,
                header.shape[2] as usize,
            ],
            header.voxel_dims_mm,
            data,
        )
    }
}

/// Read only the header of an `.spv` file (shape/TR without the payload).
///
/// # Errors
/// Fails if the file is missing or the header is malformed.
pub fn read_header(path: &Path) -> Result<SpvHeader> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = BufReader::new(f);
    let header: SpvHeader = ciborium::de::from_reader(&mut rdr)
        .with_context(|| format!("deserialize header of {}", path.display()))?;
    if header.version != SPV_VERSION {
        bail!(
            "{}: unsupported container version {} (expected {SPV_VERSION})",
            path.display(),
            header.version
        );
    }
    Ok(header)
}

fn encode(header: &SpvHeader, data: &[f32], path: &Path) -> PipelineResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + data.len() * 4);
    ciborium::ser::into_writer(header, &mut buf).map_err(|e| {
        PipelineError::AtomicCommitFailed {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        }
    })?;
    for v in data {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    Ok(buf)
}

fn decode(path: &Path) -> Result<(SpvHeader, Vec<f32>)> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = BufReader::new(f);
    let header: SpvHeader = ciborium::de::from_reader(&mut rdr)
        .with_context(|| format!("deserialize header of {}", path.display()))?;
    if header.version != SPV_VERSION {
        bail!(
            "{}: unsupported container version {} (expected {SPV_VERSION})",
            path.display(),
            header.version
        );
    }
    let n = header.nsamples();
    let mut bytes = vec![0u8; n * 4];
    rdr.read_exact(&mut bytes)
        .with_context(|| format!("read {n} samples from {}", path.display()))?;
    let data = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((header, data))
}
