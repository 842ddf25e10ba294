// crates/spineprep-motion/src/params.rs

//! Motion-parameter table I/O.
//!
//! Tab-separated with the fixed header
//! `trans_x  trans_y  trans_z  rot_x  rot_y  rot_z`, one row per
//! post-crop volume, 6-decimal values. Metadata travels in a JSON sibling.

use anyhow::{bail, Context, Result};
use spineprep_core::{
    atomic_write_bytes, atomic_write_json, MotionMeta, MotionParams, MOTION_PARAM_COLUMNS,
};
use std::path::Path;

/// Serialize a parameter table as TSV and commit it atomically.
///
/// # Errors
/// Fails on serialization or commit errors.
pub fn write_motion_tsv(path: &Path, params: &MotionParams) -> Result<()> {
    let mut w = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    w.write_record(MOTION_PARAM_COLUMNS).context("write header")?;
    for row in &params.rows {
        let rec: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        w.write_record(&rec).context("write row")?;
    }
    let bytes = w.into_inner().context("flush motion writer")?;
    atomic_write_bytes(path, &bytes)?;
    Ok(())
}

/// Read a parameter table, validating the six-column header.
///
/// # Errors
/// Fails if the file is missing, the header differs, or a row is not six
/// finite numbers.
pub fn read_motion_tsv(path: &Path) -> Result<MotionParams> {
    let mut r = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let header = r.headers().context("read header")?.clone();
    let expect: Vec<&str> = MOTION_PARAM_COLUMNS.to_vec();
    if header.iter().collect::<Vec<_>>() != expect {
        bail!(
            "{}: unexpected motion header {:?}",
            path.display(),
            header.iter().collect::<Vec<_>>()
        );
    }

    let mut rows = Vec::new();
    for rec in r.records() {
        let rec = rec.context("read row")?;
        if rec.len() != 6 {
            bail!("{}: row has {} fields, expected 6", path.display(), rec.len());
        }
        let mut row = [0.0f64; 6];
        for (i, field) in rec.iter().enumerate() {
            row[i] = field
                .parse::<f64>()
                .with_context(|| format!("{}: non-numeric field `{field}`", path.display()))?;
            if !row[i].is_finite() {
                bail!("{}: non-finite value in row", path.display());
            }
        }
        rows.push(row);
    }
    Ok(MotionParams { rows })
}

/// Commit the metadata record next to the table.
///
/// # Errors
/// Fails on serialization or commit errors.
pub fn write_motion_meta(path: &Path, meta: &MotionMeta) -> Result<()> {
    atomic_write_json(path, meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tsv_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motionparams.tsv");
        let mut p = MotionParams::zeros(3);
        p.rows[1] = [0.5, -0.25, 0.0, 0.001, 0.0, -0.002];
        write_motion_tsv(&path, &p).unwrap();
        let back = read_motion_tsv(&path).unwrap();
        assert_eq!(back.len(), 3);
        assert!((back.rows[1][0] - 0.5).abs() < 1e-9);
        assert!((back.rows[1][5] + 0.002).abs() < 1e-9);
    }

    #[test]
    fn wrong_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motionparams.tsv");
        std::fs::write(&path, "a\tb\tc\td\te\tf\n0\t0\t0\t0\t0\t0\n").unwrap();
        assert!(read_motion_tsv(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_motion_tsv(Path::new("/nope.tsv")).is_err());
    }
}
