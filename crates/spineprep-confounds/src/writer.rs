// crates/spineprep-confounds/src/writer.rs

//! Confounds table and descriptor writers.
//!
//! Canonical column order: `framewise_displacement`, `dvars`,
//! `frame_censor`, then `acomp_{tissue}_pc{NN}` per configured tissue,
//! and finally the six motion-parameter columns. Continuous values are
//! written with 6 decimals; `frame_censor` is integer 0/1.

use crate::acompcor::{TissueComponents, TissueMeta};
use crate::censor::CensorResult;
use crate::dvars::DvarsMask;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spineprep_core::{atomic_write_bytes, atomic_write_json, MotionParams, MOTION_PARAM_COLUMNS};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where the FD inputs came from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FdSource {
    /// The motion-parameters table was read successfully.
    MotionParams,
    /// The table was missing or malformed; a zero table was substituted.
    FallbackZeros,
}

/// The assembled confounds frame, keyed by post-crop volume index.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfoundsTable {
    /// Framewise displacement (mm).
    pub fd: Vec<f64>,
    /// DVARS.
    pub dvars: Vec<f64>,
    /// 0 = kept, 1 = censored.
    pub censor: Vec<u8>,
    /// Per-tissue components in configured order.
    pub acomp: Vec<TissueComponents>,
    /// Effective motion parameters (possibly the zero fallback).
    pub motion: MotionParams,
}

impl ConfoundsTable {
    /// Header fields in canonical order.
    #[must_use]
    pub fn header(&self) -> Vec<String> {
        let mut h = vec![
            "framewise_displacement".to_string(),
            "dvars".to_string(),
            "frame_censor".to_string(),
        ];
        for tc in &self.acomp {
            for c in 0..tc.pca.n_components() {
                h.push(format!("acomp_{}_pc{:02}", tc.tissue, c + 1));
            }
        }
        h.extend(MOTION_PARAM_COLUMNS.iter().map(|s| (*s).to_string()));
        h
    }

    /// Row count (post-crop volume count).
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.fd.len()
    }

    /// Serialize as a tab-separated table with header row.
    ///
    /// # Errors
    /// Fails on writer errors (in-memory, so effectively never).
    pub fn to_tsv(&self) -> Result<Vec<u8>> {
        let mut w = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        w.write_record(self.header()).context("write header")?;

        for i in 0..self.n_rows() {
            let mut row: Vec<String> = vec![
                format!("{:.6}", self.fd[i]),
                format!("{:.6}", self.dvars[i]),
                format!("{}", self.censor[i]),
            ];
            for tc in &self.acomp {
                for c in 0..tc.pca.n_components() {
                    row.push(format!("{:.6}", tc.pca.components[[i, c]]));
                }
            }
            for c in 0..6 {
                row.push(format!("{:.6}", self.motion.rows[i][c]));
            }
            w.write_record(&row).context("write row")?;
        }
        w.into_inner().context("flush confounds writer")
    }

    /// Commit the table atomically.
    ///
    /// # Errors
    /// Fails on serialization or commit errors.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_tsv()?;
        atomic_write_bytes(path, &bytes)?;
        Ok(())
    }
}

/// Censor block of the descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CensorSummary {
    /// FD threshold (mm).
    pub fd_thresh_mm: f64,
    /// DVARS threshold.
    pub dvars_thresh: f64,
    /// Padding in volumes.
    pub pad_vols: usize,
    /// Minimum contiguous kept run.
    pub min_contig_vols: usize,
    /// Kept volume count.
    pub n_kept: usize,
    /// Censored volume count.
    pub n_censored: usize,
}

impl CensorSummary {
    /// Build from configuration + result.
    #[must_use]
    pub fn new(cfg: &crate::censor::CensorConfig, result: &CensorResult) -> Self {
        Self {
            fd_thresh_mm: cfg.fd_thresh_mm,
            dvars_thresh: cfg.dvars_thresh,
            pad_vols: cfg.pad_vols,
            min_contig_vols: cfg.min_contig_vols,
            n_kept: result.n_kept,
            n_censored: result.n_censored,
        }
    }
}

/// Input provenance block of the descriptor.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfoundsSources {
    /// The 4-D image the frame was computed from.
    pub bold: PathBuf,
    /// Motion-parameters table, if one was read.
    pub motion_params: Option<PathBuf>,
    /// Tissue name → mask path (None when absent/unreadable).
    pub masks: BTreeMap<String, Option<PathBuf>>,
}

/// Machine-readable descriptor accompanying the confounds table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfoundsDescriptor {
    /// Input provenance.
    pub sources: ConfoundsSources,
    /// FD method identifier.
    pub fd_method: String,
    /// Rotation-to-arc radius (mm).
    pub fd_radius_mm: f64,
    /// Whether FD came from real parameters or the zero fallback.
    pub fd_source: FdSource,
    /// DVARS method identifier.
    pub dvars_method: String,
    /// Which voxel set DVARS used (None when DVARS degraded to zeros).
    pub dvars_mask: Option<DvarsMask>,
    /// Sampling period in seconds (the repetition time).
    pub sampling_period_s: f64,
    /// First kept volume of the crop window.
    pub crop_from: usize,
    /// One past the last kept volume of the crop window.
    pub crop_to: usize,
    /// Censor configuration and counts (None when censoring disabled).
    pub censor: Option<CensorSummary>,
    /// Tissue name → aCompCor metadata, in configured order.
    pub tissues: BTreeMap<String, TissueMeta>,
    /// Degradation notes (recoverable errors recorded verbatim).
    #[serde(default)]
    pub notes: Vec<String>,
}

impl ConfoundsDescriptor {
    /// Commit the descriptor atomically.
    ///
    /// # Errors
    /// Fails on serialization or commit errors.
    pub fn write(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::Pca;

    fn table_no_acomp(t: usize) -> ConfoundsTable {
        ConfoundsTable {
            fd: vec![0.0; t],
            dvars: vec![0.0; t],
            censor: vec![0; t],
            acomp: vec![
                TissueComponents {
                    tissue: "cord".into(),
                    n_voxels: 0,
                    pca: Pca::empty(t),
                },
                TissueComponents {
                    tissue: "wm".into(),
                    n_voxels: 0,
                    pca: Pca::empty(t),
                },
            ],
            motion: MotionParams::zeros(t),
        }
    }

    #[test]
    fn header_without_components_has_nine_fields() {
        let t = table_no_acomp(4);
        let h = t.header();
        assert_eq!(h.len(), 9);
        assert_eq!(h[0], "framewise_displacement");
        assert_eq!(h[1], "dvars");
        assert_eq!(h[2], "frame_censor");
        assert_eq!(h[3], "trans_x");
        assert_eq!(h[8], "rot_z");
    }

    #[test]
    fn tsv_shape_and_formatting() {
        let mut t = table_no_acomp(3);
        t.fd[1] = 0.123456789;
        t.censor[2] = 1;
        let bytes = t.to_tsv().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4); // header + 3 rows
        let row1: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(row1[0], "0.123457"); // 6-decimal rounding
        let row2: Vec<&str> = lines[3].split('\t').collect();
        assert_eq!(row2[2], "1"); // integer censor
    }

    #[test]
    fn acomp_columns_are_numbered_per_tissue() {
        let mut t = table_no_acomp(4);
        t.acomp[0].pca = Pca {
            components: ndarray::Array2::zeros((4, 2)),
            explained_variance: vec![0.7, 0.2],
        };
        let h = t.header();
        assert_eq!(h[3], "acomp_cord_pc01");
        assert_eq!(h[4], "acomp_cord_pc02");
        assert_eq!(h[5], "trans_x");
    }
}
