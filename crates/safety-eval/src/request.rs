use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// An experiment definition as supplied by the user, immutable input to
/// evaluation.
///
/// Type-specific knobs (intensity, memory_mb, latency_ms, interface, ...)
/// land in [`parameters`](Self::parameters) via serde flattening, so new
/// experiment types need no schema change here.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub experiment_type: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target: ExperimentTarget,
    /// Requested runtime; experiment files may also spell this `duration`.
    #[serde(alias = "duration")]
    pub duration_seconds: u64,
    /// Free-form expectations, surfaced in logs but never evaluated.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// All remaining type-specific fields.
    #[serde(flatten)]
    pub parameters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentTarget {
    /// Optional environment override; classified leniently when present.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl ExperimentRequest {
    /// Load an experiment definition from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read experiment file: {}", path.display()))?;
        Self::from_str(&contents)
            .with_context(|| format!("failed to parse experiment file: {}", path.display()))
    }

    /// Parse an experiment definition from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(yaml: &str) -> Result<Self> {
        serde_yml::from_str(yaml).context("YAML deserialization failed")
    }

    /// Numeric parameter by name, accepting both integer and float YAML
    /// scalars.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(|v| v.as_f64())
    }

    /// String parameter by name.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}
