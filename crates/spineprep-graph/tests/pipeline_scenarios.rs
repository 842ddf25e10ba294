//! End-to-end scenarios over the planned DAG, with every external tool
//! absent (the placeholder/fallback path is the testable one).

use spineprep_core::{
    deriv::{func_path, Desc, Space},
    io::{read_json, skip_marker},
    synth::write_tiny_dataset,
    Config, CropReason, CropSidecar, Manifest,
};
use spineprep_graph::{execute, export_dag, plan, ExecMode};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    manifest: Manifest,
    config: Config,
    work: PathBuf,
}

fn fixture(nvols: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let bids = dir.path().join("bids");
    let deriv = dir.path().join("deriv");
    let work = dir.path().join("work");

    let run = write_tiny_dataset(&bids, nvols).unwrap();
    let mut manifest = Manifest::default();
    manifest.runs.push(run);
    manifest.sort();
    manifest.validate().unwrap();

    let mut config = Config::default();
    config.paths.bids_dir = bids;
    config.paths.deriv_dir = deriv;
    Fixture {
        _dir: dir,
        manifest,
        config,
        work,
    }
}

fn confounds_lines(fx: &Fixture) -> Vec<String> {
    let path = func_path(
        &fx.config.paths.deriv_dir,
        &fx.manifest.runs[0].id,
        Space::Native,
        Desc::Confounds,
    );
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(ToOwned::to_owned)
        .collect()
}

/// Snapshot (path, mtime) for every file under a root.
fn snapshot(root: &Path) -> Vec<(PathBuf, std::time::SystemTime)> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push((path, entry.metadata().unwrap().modified().unwrap()));
            }
        }
    }
    out.sort();
    out
}

#[test]
fn empty_dataset_smoke() {
    // One subject, one 6x6x3x4 image, no sidecars, all tools absent.
    let fx = fixture(4);
    let dag = plan(&fx.manifest, &fx.config);
    let report = execute(&dag, &fx.manifest, &fx.config, ExecMode::Run, &fx.work).unwrap();

    assert!(!report.has_failed());
    // Motion and mask steps degrade to placeholders.
    assert_eq!(report.stages["segment"].skip, 1);
    assert_eq!(report.stages["motion"].skip, 1);
    assert_eq!(report.stages["confounds"].ok, 1);
    assert_eq!(report.stages["crop_detect"].ok, 1);

    let lines = confounds_lines(&fx);
    assert_eq!(lines.len(), 5); // header + 4 data rows
    assert_eq!(lines[0].split('\t').count(), 9);
    for row in &lines[1..] {
        for field in row.split('\t') {
            let v: f64 = field.parse().unwrap();
            assert_eq!(v, 0.0);
        }
    }

    let run_id = &fx.manifest.runs[0].id;
    let motion_img = func_path(&fx.config.paths.deriv_dir, run_id, Space::Native, Desc::Motion);
    let cordmask = func_path(&fx.config.paths.deriv_dir, run_id, Space::Native, Desc::Cordmask);
    assert!(skip_marker(&motion_img).exists());
    assert!(skip_marker(&cordmask).exists());
}

#[test]
fn second_invocation_is_idempotent() {
    let fx = fixture(4);
    let dag = plan(&fx.manifest, &fx.config);
    execute(&dag, &fx.manifest, &fx.config, ExecMode::Run, &fx.work).unwrap();

    let before = snapshot(&fx.config.paths.deriv_dir);
    let report = execute(&dag, &fx.manifest, &fx.config, ExecMode::Run, &fx.work).unwrap();
    let after = snapshot(&fx.config.paths.deriv_dir);

    // No new files and no rewrites.
    assert_eq!(before, after);
    // The report still reflects the concluded statuses.
    assert!(!report.has_failed());
    assert_eq!(report.stages["confounds"].ok, 1);
}

#[test]
fn touched_input_forces_rebuild_down_the_chain() {
    let fx = fixture(4);
    let dag = plan(&fx.manifest, &fx.config);
    execute(&dag, &fx.manifest, &fx.config, ExecMode::Run, &fx.work).unwrap();

    let run_id = &fx.manifest.runs[0].id;
    let sidecar = func_path(&fx.config.paths.deriv_dir, run_id, Space::Native, Desc::Crop);
    let confounds = func_path(&fx.config.paths.deriv_dir, run_id, Space::Native, Desc::Confounds);
    let mtime = |p: &std::path::Path| std::fs::metadata(p).unwrap().modified().unwrap();
    let sidecar_before = mtime(&sidecar);
    let confounds_before = mtime(&confounds);

    // Regenerate the input image: every concluded step downstream of it
    // is now stale and must re-execute.
    std::thread::sleep(std::time::Duration::from_millis(20));
    spineprep_core::synth::constant_series([6, 6, 3, 4], 50.0, 2.0)
        .write(&fx.manifest.runs[0].bold_path)
        .unwrap();

    let report = execute(&dag, &fx.manifest, &fx.config, ExecMode::Run, &fx.work).unwrap();
    assert!(!report.has_failed());
    assert!(mtime(&sidecar) > sidecar_before);
    assert!(mtime(&confounds) > confounds_before);
}

#[test]
fn pre_published_sidecar_drives_crop_through_motion_and_confounds() {
    // Sidecar {from:1, to:4, nvols:4} written before execution.
    let fx = fixture(4);
    let run_id = fx.manifest.runs[0].id.clone();
    let sidecar_path = func_path(&fx.config.paths.deriv_dir, &run_id, Space::Native, Desc::Crop);
    spineprep_motion::write_sidecar(
        &sidecar_path,
        &CropSidecar {
            from: 1,
            to: 4,
            nvols: 4,
            reason: CropReason::RobustZ,
        },
    )
    .unwrap();

    let dag = plan(&fx.manifest, &fx.config);
    execute(&dag, &fx.manifest, &fx.config, ExecMode::Run, &fx.work).unwrap();

    let params_path = func_path(
        &fx.config.paths.deriv_dir,
        &run_id,
        Space::Native,
        Desc::MotionParams,
    );
    let params = spineprep_motion::read_motion_tsv(&params_path).unwrap();
    assert_eq!(params.len(), 3);

    let lines = confounds_lines(&fx);
    assert_eq!(lines.len(), 4); // header + 3 data rows

    let meta_path = func_path(
        &fx.config.paths.deriv_dir,
        &run_id,
        Space::Native,
        Desc::ConfoundsMeta,
    );
    let descriptor: serde_json::Value = read_json(&meta_path).unwrap();
    assert_eq!(descriptor["crop_from"], 1);
    assert_eq!(descriptor["crop_to"], 4);
}

#[test]
fn dry_run_exports_dag_without_writing_outputs() {
    let fx = fixture(4);
    let dag = plan(&fx.manifest, &fx.config);

    let graph_path = fx.work.join("graph.svg");
    std::fs::create_dir_all(&fx.work).unwrap();
    export_dag(&dag, &graph_path).unwrap();
    assert!(graph_path.is_file());
    assert!(std::fs::metadata(&graph_path).unwrap().len() > 0);

    let report = execute(&dag, &fx.manifest, &fx.config, ExecMode::DryRun, &fx.work).unwrap();
    assert!(report.stages.is_empty());

    // No step's primary output was written.
    for step in &dag.steps {
        assert!(
            !step.primary_output.exists(),
            "{} exists after dry-run",
            step.primary_output.display()
        );
    }
}

#[test]
fn missing_image_fails_the_invocation() {
    let mut fx = fixture(4);
    // Break the hard contract after manifest validation.
    std::fs::remove_file(&fx.manifest.runs[0].bold_path).unwrap();
    fx.config.options.masks.enable = false; // reach crop_detect directly

    let dag = plan(&fx.manifest, &fx.config);
    let report = execute(&dag, &fx.manifest, &fx.config, ExecMode::Run, &fx.work).unwrap();
    assert!(report.has_failed());
    assert!(report.failures[0].contains("missing required input"));
}

#[test]
fn parallel_execution_matches_serial_results() {
    let serial = fixture(4);
    let dag = plan(&serial.manifest, &serial.config);
    execute(&dag, &serial.manifest, &serial.config, ExecMode::Run, &serial.work).unwrap();

    let mut parallel = fixture(4);
    parallel.config.options.cores = 4;
    let dag2 = plan(&parallel.manifest, &parallel.config);
    let report = execute(
        &dag2,
        &parallel.manifest,
        &parallel.config,
        ExecMode::Run,
        &parallel.work,
    )
    .unwrap();
    assert!(!report.has_failed());

    assert_eq!(confounds_lines(&serial), confounds_lines(&parallel));
}
