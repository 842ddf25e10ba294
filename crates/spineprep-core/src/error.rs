// crates/spineprep-core/src/error.rs

//! Pipeline error taxonomy.
//!
//! Errors are discriminated by kind, not by source language type: the
//! orchestrator decides `SKIP` vs `FAILED` from [`PipelineError::is_fatal`],
//! and every recoverable error is recorded verbatim in the per-artifact
//! provenance before the step downgrades to a skip.

use std::path::PathBuf;
use thiserror::Error;

/// All error kinds the core distinguishes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration; computed before execution starts.
    #[error("invalid configuration key `{key}`: {message}")]
    ConfigInvalid {
        /// Offending configuration key (dotted path).
        key: String,
        /// Human-readable explanation.
        message: String,
    },

    /// A hard contract was violated: a declared input file is missing.
    #[error("missing required input: {}", path.display())]
    MissingRequiredInput {
        /// The path that was expected to exist.
        path: PathBuf,
    },

    /// An external tool is not on PATH; the step may skip with a placeholder.
    #[error("external tool unavailable: {tool}")]
    ToolUnavailable {
        /// Binary name that could not be located.
        tool: String,
    },

    /// An external tool ran and failed; the step may skip with a placeholder.
    #[error("external tool `{tool}` failed: {message}")]
    ToolFailure {
        /// Binary name.
        tool: String,
        /// Captured failure detail (exit status, stderr excerpt).
        message: String,
    },

    /// Numerical degeneracy (empty mask, zero MAD, rank-0 matrix, ...).
    #[error("numerical degeneracy in {what}: {message}")]
    NumericalDegenerate {
        /// The computation that degenerated.
        what: String,
        /// Detail used in provenance notes.
        message: String,
    },

    /// The temp-write-then-rename commit itself failed; nothing partial is visible.
    #[error("atomic commit failed for {}", path.display())]
    AtomicCommitFailed {
        /// Intended final artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Whether this kind aborts the invocation (vs. downgrading to SKIP).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::MissingRequiredInput { .. }
                | Self::AtomicCommitFailed { .. }
        )
    }

    /// Stable kind tag used in provenance and summaries.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "config-invalid",
            Self::MissingRequiredInput { .. } => "missing-required-input",
            Self::ToolUnavailable { .. } => "tool-unavailable",
            Self::ToolFailure { .. } => "tool-failure",
            Self::NumericalDegenerate { .. } => "numerical-degenerate",
            Self::AtomicCommitFailed { .. } => "atomic-commit-failed",
        }
    }
}

/// Crate-local result alias.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
