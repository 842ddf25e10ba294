// crates/spineprep-core/src/provenance.rs

//! Per-artifact provenance records.
//!
//! One record per produced artifact, stored adjacent with a `.prov.json`
//! suffix: step name, output path, input paths, parameter record, tool
//! versions, ISO-8601 UTC timestamp, and a BLAKE3 fingerprint over the
//! canonical parameter encoding (used to detect parameter drift between
//! invocations).

use crate::io::atomic_write_json;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Provenance record written next to every artifact.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProvenanceRecord {
    /// Step name (e.g. `confounds`, `motion`, `crop_detect`).
    pub step: String,
    /// The artifact this record describes.
    pub output: PathBuf,
    /// Declared input paths.
    pub inputs: Vec<PathBuf>,
    /// Free-form parameter record (echo of the effective step parameters).
    pub params: serde_json::Value,
    /// BLAKE3 hex fingerprint over the canonical `params` encoding.
    pub param_fingerprint: String,
    /// Tool name → version string (`absent` when not found).
    pub tool_versions: BTreeMap<String, String>,
    /// ISO-8601 UTC timestamp of record creation.
    pub timestamp: String,
    /// Notes appended by fallback paths (recoverable errors, overrides).
    #[serde(default)]
    pub notes: Vec<String>,
}

impl ProvenanceRecord {
    /// Build a record stamped with the current UTC time.
    #[must_use]
    pub fn new(
        step: &str,
        output: &Path,
        inputs: Vec<PathBuf>,
        params: serde_json::Value,
        tool_versions: BTreeMap<String, String>,
    ) -> Self {
        Self {
            step: step.to_string(),
            output: output.to_path_buf(),
            inputs,
            param_fingerprint: param_fingerprint(&params),
            params,
            tool_versions,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            notes: Vec::new(),
        }
    }

    /// Append a note (recoverable error text, emergency-override record).
    pub fn note(&mut self, text: impl Into<String>) {
        self.notes.push(text.into());
    }

    /// Sidecar path for an artifact: `<artifact>.prov.json`.
    #[must_use]
    pub fn path_for(artifact: &Path) -> PathBuf {
        let mut name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".prov.json");
        artifact.with_file_name(name)
    }

    /// Commit the record next to its artifact.
    ///
    /// # Errors
    /// Fails on serialization or commit errors.
    pub fn write(&self) -> Result<()> {
        atomic_write_json(&Self::path_for(&self.output), self)
    }
}

/// BLAKE3 hex digest over the canonical (compact) JSON encoding of `params`.
#[must_use]
pub fn param_fingerprint(params: &serde_json::Value) -> String {
    let canonical = params.to_string();
    hex::encode(blake3::hash(canonical.as_bytes()).as_bytes())
}
