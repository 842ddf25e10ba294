// crates/spineprep-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

mod discover;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spineprep_core::{deriv::manifest_path, Config};
use spineprep_graph::{execute, export_dag, plan, ExecMode, ExecReport};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Exit code for clean completion.
const EXIT_OK: u8 = 0;
/// Exit code for fatal outcomes.
const EXIT_FATAL: u8 = 1;
/// Exit code for soft warnings (SKIP-bearing runs, nothing to process).
const EXIT_SOFT: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "spineprep",
    about = "Spinal-cord fMRI preprocessing",
    long_about = "Spinal-cord fMRI preprocessing.\n\nDiscovers functional runs, plans the processing graph, and executes it with skip/fallback semantics and per-artifact provenance.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Discover the dataset, plan the DAG, and run the pipeline.
    Run {
        /// Input dataset root
        #[arg(long)]
        bids_dir: PathBuf,

        /// Output derivatives root
        #[arg(long)]
        out: PathBuf,

        /// Optional YAML configuration path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Plan only; execute nothing
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Export the DAG (.svg renders via dot when available, else DOT text)
        #[arg(long)]
        save_dag: Option<PathBuf>,

        /// Echo the effective configuration before running
        #[arg(long, default_value_t = false)]
        print_config: bool,

        /// Promote any SKIP outcome to a failure
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Worker-pool size (overrides options.cores; 0 = serial)
        #[arg(long)]
        cores: Option<usize>,
    },

    /// Discover the dataset and write the manifest CSV without running.
    Discover {
        /// Input dataset root
        #[arg(long)]
        bids_dir: PathBuf,

        /// Output derivatives root (manifest lands here)
        #[arg(long)]
        out: PathBuf,

        /// Optional YAML configuration path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration as YAML.
    PrintConfig {
        /// Optional YAML configuration path
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn dispatch(cli: Cli) -> Result<u8> {
    match cli.cmd {
        Cmd::Run {
            bids_dir,
            out,
            config,
            dry_run,
            save_dag,
            print_config,
            strict,
            cores,
        } => run(
            bids_dir,
            out,
            config,
            dry_run,
            save_dag,
            print_config,
            strict,
            cores,
        ),
        Cmd::Discover {
            bids_dir,
            out,
            config,
        } => discover_only(bids_dir, out, config),
        Cmd::PrintConfig { config } => {
            let cfg = load_config(config, None, None, None)?;
            println!("{}", cfg.to_yaml()?);
            Ok(EXIT_OK)
        }
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Load + merge configuration: file (if any), then CLI path/core overrides.
fn load_config(
    path: Option<PathBuf>,
    bids_dir: Option<PathBuf>,
    out: Option<PathBuf>,
    cores: Option<usize>,
) -> Result<Config> {
    let mut cfg = match path {
        Some(p) => Config::from_yaml_file(&p)?,
        None => Config::default(),
    };
    if let Some(b) = bids_dir {
        cfg.paths.bids_dir = b;
    }
    if let Some(o) = out {
        cfg.paths.deriv_dir = o;
    }
    if let Some(c) = cores {
        cfg.options.cores = c;
    }
    cfg.validate()?;
    Ok(cfg)
}

#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn run(
    bids_dir: PathBuf,
    out: PathBuf,
    config: Option<PathBuf>,
    dry_run: bool,
    save_dag: Option<PathBuf>,
    print_config: bool,
    strict: bool,
    cores: Option<usize>,
) -> Result<u8> {
    let cfg = load_config(config, Some(bids_dir), Some(out), cores)?;
    if print_config {
        println!("{}", cfg.to_yaml()?);
    }

    let manifest = discover::discover(&cfg)?;
    if manifest.runs.is_empty() {
        warn!("no functional runs discovered; nothing to do");
        return Ok(EXIT_SOFT);
    }
    manifest.validate()?;

    std::fs::create_dir_all(&cfg.paths.deriv_dir)
        .with_context(|| format!("create {}", cfg.paths.deriv_dir.display()))?;
    manifest.write_csv(&manifest_path(&cfg.paths.deriv_dir))?;
    info!(runs = manifest.runs.len(), "manifest written");

    let dag = plan(&manifest, &cfg);
    info!(steps = dag.len(), "DAG planned");

    if let Some(path) = &save_dag {
        export_dag(&dag, path)?;
    }

    let mode = if dry_run { ExecMode::DryRun } else { ExecMode::Run };
    let work_root = cfg.paths.deriv_dir.join(".work");
    let report = execute(&dag, &manifest, &cfg, mode, &work_root)?;

    print_summary(&report);
    if report.has_failed() {
        return Ok(EXIT_FATAL);
    }
    if report.has_skip() {
        if strict {
            error!("--strict: SKIP outcomes promoted to failure");
            return Ok(EXIT_FATAL);
        }
        warn!("some steps skipped with placeholder outputs");
        return Ok(EXIT_SOFT);
    }
    Ok(EXIT_OK)
}

fn discover_only(bids_dir: PathBuf, out: PathBuf, config: Option<PathBuf>) -> Result<u8> {
    let cfg = load_config(config, Some(bids_dir), Some(out.clone()), None)?;
    let manifest = discover::discover(&cfg)?;
    if manifest.runs.is_empty() {
        warn!("no functional runs discovered");
        return Ok(EXIT_SOFT);
    }
    manifest.validate()?;
    std::fs::create_dir_all(&out)?;
    manifest.write_csv(&manifest_path(&out))?;
    println!(
        "Discovered {} runs, {} anatomical images → {}",
        manifest.runs.len(),
        manifest.anat.len(),
        manifest_path(&out).display()
    );
    Ok(EXIT_OK)
}

fn print_summary(report: &ExecReport) {
    for (stage, s) in &report.stages {
        println!("{stage:<14} OK={} SKIP={} FAILED={}", s.ok, s.skip, s.failed);
    }
    for failure in &report.failures {
        println!("FAILED: {failure}");
    }
}
