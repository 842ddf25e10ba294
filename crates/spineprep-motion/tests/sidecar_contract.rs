//! The crop sidecar contract between detection, motion, and downstream
//! readers.
//!
//! - For every run the published bounds satisfy `0 <= from <= to <= nvols`.
//! - Motion reads the sidecar at execution time; a sidecar written after
//!   planning is honored without re-planning.
//! - A deleted sidecar degrades readers to the full range and the reason
//!   is recorded in their provenance.

use spineprep_core::{
    deriv::{func_path, Desc, Space},
    io::{ok_marker, read_json, skip_marker},
    synth::write_tiny_dataset,
    Config, CropReason, CropSidecar, ProvenanceRecord, StepStatus,
};
use spineprep_motion::{
    read_motion_tsv, run_crop_step, run_motion_step, write_sidecar,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    deriv: std::path::PathBuf,
    work: std::path::PathBuf,
    run: spineprep_core::RunRecord,
    config: Config,
}

fn fixture(nvols: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let bids = dir.path().join("bids");
    let deriv = dir.path().join("deriv");
    let work = dir.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let run = write_tiny_dataset(&bids, nvols).unwrap();
    let mut config = Config::default();
    config.paths.bids_dir = bids;
    config.paths.deriv_dir = deriv.clone();
    Fixture {
        _dir: dir,
        deriv,
        work,
        run,
        config,
    }
}

#[test]
fn crop_step_publishes_valid_sidecar_with_marker_and_provenance() {
    let fx = fixture(4);
    let status = run_crop_step(&fx.run, &fx.deriv, &fx.config).unwrap();
    assert_eq!(status, StepStatus::Ok);

    let sidecar_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::Crop);
    let sc: CropSidecar = read_json(&sidecar_path).unwrap();
    assert!(sc.is_valid());
    assert_eq!(sc.nvols, 4);
    // Constant synthetic series: the statistic is flat, nothing trims.
    assert_eq!(sc.reason, CropReason::NoCrop);

    assert!(ok_marker(&sidecar_path).exists());
    let prov: ProvenanceRecord =
        read_json(&ProvenanceRecord::path_for(&sidecar_path)).unwrap();
    assert_eq!(prov.step, "crop_detect");
    assert_eq!(prov.inputs, vec![fx.run.bold_path.clone()]);
}

#[test]
fn motion_consumes_sidecar_written_after_planning() {
    // Scenario: sidecar {from:1, to:4, nvols:4} -> 3 parameter rows.
    let fx = fixture(4);
    let sidecar_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::Crop);
    write_sidecar(
        &sidecar_path,
        &CropSidecar {
            from: 1,
            to: 4,
            nvols: 4,
            reason: CropReason::RobustZ,
        },
    )
    .unwrap();

    let status =
        run_motion_step(&fx.run, &[&fx.run], &fx.deriv, &fx.config, &fx.work).unwrap();
    // Default engine is slice-wise and the tool is absent in tests.
    assert_eq!(status, StepStatus::Skip);

    let params_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::MotionParams);
    let params = read_motion_tsv(&params_path).unwrap();
    assert_eq!(params.len(), 3);

    let image_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::Motion);
    assert!(skip_marker(&image_path).exists());
    let corrected = spineprep_core::Volume4::read(&image_path).unwrap();
    assert_eq!(corrected.nvols(), 3);

    let prov: ProvenanceRecord = read_json(&ProvenanceRecord::path_for(&image_path)).unwrap();
    assert_eq!(prov.params["crop_from"], 1);
    assert_eq!(prov.params["crop_to"], 4);
}

#[test]
fn missing_sidecar_defaults_to_full_range_and_is_recorded() {
    let fx = fixture(5);
    let status =
        run_motion_step(&fx.run, &[&fx.run], &fx.deriv, &fx.config, &fx.work).unwrap();
    assert_eq!(status, StepStatus::Skip);

    let params_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::MotionParams);
    assert_eq!(read_motion_tsv(&params_path).unwrap().len(), 5);

    let image_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::Motion);
    let prov: ProvenanceRecord = read_json(&ProvenanceRecord::path_for(&image_path)).unwrap();
    assert_eq!(prov.params["crop_reason"], "no-sidecar");
}

#[test]
fn motion_step_is_idempotent() {
    let fx = fixture(4);
    run_motion_step(&fx.run, &[&fx.run], &fx.deriv, &fx.config, &fx.work).unwrap();

    let image_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::Motion);
    let mtime = std::fs::metadata(&image_path).unwrap().modified().unwrap();

    let again =
        run_motion_step(&fx.run, &[&fx.run], &fx.deriv, &fx.config, &fx.work).unwrap();
    assert_eq!(again, StepStatus::Skip);
    assert_eq!(
        std::fs::metadata(&image_path).unwrap().modified().unwrap(),
        mtime
    );
}

#[test]
fn hybrid_without_tools_still_emits_full_contract() {
    let mut fx = fixture(4);
    fx.config.options.motion.engine = spineprep_core::MotionEngineKind::Hybrid;

    let status =
        run_motion_step(&fx.run, &[&fx.run], &fx.deriv, &fx.config, &fx.work).unwrap();
    assert_eq!(status, StepStatus::Skip);

    let meta_path = func_path(&fx.deriv, &fx.run.id, Space::Native, Desc::MotionParamsMeta);
    let meta: spineprep_core::MotionMeta = read_json(&meta_path).unwrap();
    assert_eq!(meta.engine, spineprep_core::MotionEngineKind::Hybrid);
    assert_eq!(meta.status, spineprep_core::MotionStatus::FallbackCopy);
}
