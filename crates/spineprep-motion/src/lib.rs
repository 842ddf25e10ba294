// crates/spineprep-motion/src/lib.rs

//! Temporal-crop detection, the crop sidecar contract, and motion
//! correction for SpinePrep.
//!
//! - [`crop`]: robust-z detection + sidecar publish/read (the sidecar is
//!   the sole authority for the effective crop).
//! - [`engine`]: the four motion engines and their declared fallbacks.
//! - [`coordinator`]: the per-run crop and motion steps, including crop
//!   application and artifact/marker/provenance emission.
//! - [`params`]: motion-parameter table I/O.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod coordinator;
pub mod crop;
pub mod engine;
pub mod params;

pub use coordinator::{run_crop_step, run_motion_step};
pub use crop::{
    apply_env_override, detect_crop, read_sidecar_or_default, write_sidecar, ENV_CROP_FROM,
    ENV_CROP_TO,
};
pub use engine::{
    engine_for, EngineOutcome, EngineRun, MotionEngine, SLICE_TOOL, VOLUME_TOOL,
};
pub use params::{read_motion_tsv, write_motion_meta, write_motion_tsv};
