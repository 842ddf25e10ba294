//! spineprep-bench-harness
//!
//! Run small end-to-end benchmarks (generate -> crop-detect -> mppca ->
//! confounds) and append CSV rows into `benchmarks/reports/bench-<unix>.csv`.
//!
//! Usage examples:
//!   cargo run -p spineprep-bench-harness -- --profile configs/profiles/small.toml
//!   cargo run -p spineprep-bench-harness -- --profile configs/profiles/medium.toml

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Deserialize;

use spineprep_confounds::{compute_confounds, mppca_denoise, ConfoundsRequest};
use spineprep_core::synth::{full_mask, noisy_series};
use spineprep_core::{Config, CropReason, CropSidecar, MotionParams};
use spineprep_motion::detect_crop;

#[derive(Debug, Deserialize)]
struct Profile {
    /// Spatial dimensions of the synthetic series
    nx: usize,
    ny: usize,
    nz: usize,
    /// Volume count
    t: usize,
    /// Repetitions of the whole pipeline
    repeats: u32,
}

fn parse_flag(name: &str, default: &str) -> String {
    let mut it = std::env::args().skip(1);
    while let Some(k) = it.next() {
        if k == format!("--{name}") {
            return it.next().unwrap_or_else(|| default.to_string());
        }
    }
    default.to_string()
}

fn dur_ms(d: Duration) -> u128 {
    d.as_millis()
}

fn main() -> Result<()> {
    let profile_path = PathBuf::from(parse_flag("profile", "configs/profiles/small.toml"));
    let profile_src = fs::read_to_string(&profile_path)
        .with_context(|| format!("read profile {profile_path:?}"))?;
    let profile: Profile = toml::from_str(&profile_src).context("parse profile toml")?;
    println!(
        "Profile: {}x{}x{}x{}, repeats={}",
        profile.nx, profile.ny, profile.nz, profile.t, profile.repeats
    );

    fs::create_dir_all("benchmarks/reports").ok();

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let csv_path = PathBuf::from(format!("benchmarks/reports/bench-{ts}.csv"));
    let mut csv = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&csv_path)?;
    writeln!(csv, "timestamp,nx,ny,nz,t,repeat,stage,ms,extra")?;

    let config = Config::default();
    let shape = [profile.nx, profile.ny, profile.nz, profile.t];

    for rep in 0..profile.repeats {
        // 1) generate synthetic series
        let t0 = Instant::now();
        let vol = noisy_series(shape, 2024 + u64::from(rep), 2.0);
        let mask = full_mask(&vol);
        let t_gen = t0.elapsed();
        writeln!(
            csv,
            "{ts},{},{},{},{},{rep},generate,{},",
            profile.nx,
            profile.ny,
            profile.nz,
            profile.t,
            dur_ms(t_gen)
        )?;

        // 2) crop detection
        let t0 = Instant::now();
        let sidecar = detect_crop(&vol, Some(&mask), &config.options.temporal_crop);
        let t_crop = t0.elapsed();
        writeln!(
            csv,
            "{ts},{},{},{},{},{rep},crop_detect,{},{}",
            profile.nx,
            profile.ny,
            profile.nz,
            profile.t,
            dur_ms(t_crop),
            sidecar.reason
        )?;

        // 3) MP-PCA denoise
        let t0 = Instant::now();
        let denoised = mppca_denoise(&vol);
        let t_mppca = t0.elapsed();
        writeln!(
            csv,
            "{ts},{},{},{},{},{rep},mppca,{},n_signal={}",
            profile.nx,
            profile.ny,
            profile.nz,
            profile.t,
            dur_ms(t_mppca),
            denoised.n_signal
        )?;

        // 4) confounds over the cropped, denoised series
        let cropped = denoised.denoised.crop_time(sidecar.from, sidecar.to)?;
        let motion = MotionParams::zeros(cropped.nvols());
        let t0 = Instant::now();
        let out = compute_confounds(&ConfoundsRequest {
            bold: &cropped,
            bold_path: "bench.spv".into(),
            motion: Some(&motion),
            motion_path: None,
            masks: vec![("cord".to_string(), Some(mask.clone()), None)],
            crop: CropSidecar::full(cropped.nvols(), CropReason::NoCrop),
            censor: &config.options.censor,
            acompcor: &config.options.acompcor,
        });
        let t_conf = t0.elapsed();
        writeln!(
            csv,
            "{ts},{},{},{},{},{rep},confounds,{},n_cols={}",
            profile.nx,
            profile.ny,
            profile.nz,
            profile.t,
            dur_ms(t_conf),
            out.table.header().len()
        )?;
    }

    println!("Wrote {}", csv_path.display());
    Ok(())
}
