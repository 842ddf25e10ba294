// crates/spineprep-core/src/manifest.rs

//! Pipeline manifest: the ordered run inventory plus anatomical records.
//!
//! One manifest per invocation. Invariants enforced by [`Manifest::validate`]:
//! deterministic ordering by (subject, session, task, run), unique entity
//! tuples, and readable imaging paths.

use crate::error::{PipelineError, PipelineResult};
use crate::io::atomic_write_bytes;
use crate::types::{AnatRecord, RunId, RunRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Manifest schema version written to the CSV header comment row.
pub const MANIFEST_VERSION: u32 = 1;

/// Ordered sequence of run descriptors plus anatomical records.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Functional runs, ordered by (subject, session, task, run).
    pub runs: Vec<RunRecord>,
    /// Anatomical records.
    pub anat: Vec<AnatRecord>,
}

/// Flat CSV row mirroring [`RunRecord`].
#[derive(Debug, Serialize, Deserialize)]
struct RunRow {
    subject: String,
    session: String,
    task: String,
    acquisition: String,
    run: u32,
    bold_path: String,
    tr_s: f64,
    pe_dir: String,
    vx_mm: f32,
    vy_mm: f32,
    vz_mm: f32,
    nvols: usize,
    motion_group: String,
}

impl From<&RunRecord> for RunRow {
    fn from(r: &RunRecord) -> Self {
        Self {
            subject: r.id.subject.clone(),
            session: r.id.session.clone().unwrap_or_default(),
            task: r.id.task.clone(),
            acquisition: r.id.acquisition.clone().unwrap_or_default(),
            run: r.id.run,
            bold_path: r.bold_path.to_string_lossy().into_owned(),
            tr_s: r.tr_s,
            pe_dir: r.pe_dir.clone().unwrap_or_default(),
            vx_mm: r.voxel_dims_mm[0],
            vy_mm: r.voxel_dims_mm[1],
            vz_mm: r.voxel_dims_mm[2],
            nvols: r.nvols,
            motion_group: r.motion_group.clone().unwrap_or_default(),
        }
    }
}

impl From<RunRow> for RunRecord {
    fn from(r: RunRow) -> Self {
        let opt = |s: String| if s.is_empty() { None } else { Some(s) };
        Self {
            id: RunId {
                subject: r.subject,
                session: opt(r.session),
                task: r.task,
                acquisition: opt(r.acquisition),
                run: r.run,
            },
            bold_path: PathBuf::from(r.bold_path),
            tr_s: r.tr_s,
            pe_dir: opt(r.pe_dir),
            voxel_dims_mm: [r.vx_mm, r.vy_mm, r.vz_mm],
            nvols: r.nvols,
            motion_group: opt(r.motion_group),
        }
    }
}

impl Manifest {
    /// Sort runs into the canonical (subject, session, task, run) order.
    pub fn sort(&mut self) {
        self.runs.sort_by(|a, b| a.id.cmp(&b.id));
        self.anat
            .sort_by(|a, b| (&a.subject, &a.session).cmp(&(&b.subject, &b.session)));
    }

    /// Check ordering, tuple uniqueness, and imaging-path existence.
    ///
    /// # Errors
    /// - [`PipelineError::ConfigInvalid`] for ordering/uniqueness violations
    ///   (the manifest is an input contract).
    /// - [`PipelineError::MissingRequiredInput`] for unreadable image paths.
    pub fn validate(&self) -> PipelineResult<()> {
        let mut seen: HashSet<&RunId> = HashSet::new();
        let mut prev: Option<&RunId> = None;
        for run in &self.runs {
            if !seen.insert(&run.id) {
                return Err(PipelineError::ConfigInvalid {
                    key: "manifest.runs".into(),
                    message: format!("duplicate run tuple {}", run.id),
                });
            }
            if let Some(p) = prev {
                if p > &run.id {
                    return Err(PipelineError::ConfigInvalid {
                        key: "manifest.runs".into(),
                        message: format!("runs out of order at {}", run.id),
                    });
                }
            }
            prev = Some(&run.id);
            if !run.bold_path.is_file() {
                return Err(PipelineError::MissingRequiredInput {
                    path: run.bold_path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Write the run table as a tab-separated CSV, atomically.
    ///
    /// # Errors
    /// Fails on serialization or commit errors.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut w = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        for run in &self.runs {
            w.serialize(RunRow::from(run))
                .context("serialize manifest row")?;
        }
        let bytes = w.into_inner().context("flush manifest writer")?;
        atomic_write_bytes(path, &bytes)?;
        Ok(())
    }

    /// Read the run table back from a tab-separated CSV.
    ///
    /// Anatomical records are not persisted in the CSV; callers re-discover
    /// them when needed.
    ///
    /// # Errors
    /// Fails if the file cannot be read or parsed.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut r = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("open manifest {}", path.display()))?;
        let mut runs = Vec::new();
        for row in r.deserialize::<RunRow>() {
            runs.push(RunRecord::from(row.context("parse manifest row")?));
        }
        Ok(Self {
            runs,
            anat: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(subject: &str, run: u32, path: PathBuf) -> RunRecord {
        RunRecord {
            id: RunId {
                subject: subject.into(),
                session: None,
                task: "rest".into(),
                acquisition: None,
                run,
            },
            bold_path: path,
            tr_s: 2.0,
            pe_dir: Some("AP".into()),
            voxel_dims_mm: [1.0, 1.0, 5.0],
            nvols: 4,
            motion_group: None,
        }
    }

    #[test]
    fn csv_roundtrip() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("bold.spv");
        std::fs::write(&img, b"x").unwrap();

        let mut m = Manifest::default();
        m.runs.push(record("02", 1, img.clone()));
        m.runs.push(record("01", 1, img.clone()));
        m.sort();

        let csv_path = dir.path().join("manifest.csv");
        m.write_csv(&csv_path).unwrap();
        let back = Manifest::read_csv(&csv_path).unwrap();
        assert_eq!(back.runs, m.runs);
        assert_eq!(back.runs[0].id.subject, "01");
    }

    #[test]
    fn duplicate_tuple_rejected() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("bold.spv");
        std::fs::write(&img, b"x").unwrap();

        let mut m = Manifest::default();
        m.runs.push(record("01", 1, img.clone()));
        m.runs.push(record("01", 1, img));
        let err = m.validate().unwrap_err();
        assert_eq!(err.kind(), "config-invalid");
    }

    #[test]
    fn missing_image_is_fatal() {
        let mut m = Manifest::default();
        m.runs.push(record("01", 1, PathBuf::from("/nope.spv")));
        let err = m.validate().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.kind(), "missing-required-input");
    }
}
