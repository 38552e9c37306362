use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Cloud evidence gathered by a successful metadata probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInfo {
    /// Provider name, e.g. `aws`, `gcp`, `azure`.
    pub provider: String,
    /// Provider-specific metadata (instance id, project id, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Instance tags, when the metadata service exposes them.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl CloudInfo {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            metadata: HashMap::new(),
            tags: HashMap::new(),
        }
    }
}

/// Snapshot of the evidence the detector classifies against.
///
/// The snapshot is taken once per detection pass; rule evaluation itself
/// never queries the system, so detection cannot block.
#[derive(Debug, Clone)]
pub struct DetectionContext {
    /// Local hostname.
    pub hostname: String,
    /// Process environment variables at snapshot time.
    pub env_vars: HashMap<String, String>,
    /// Completed cloud-probe result, if any probe succeeded.
    pub cloud: Option<CloudInfo>,
}

impl DetectionContext {
    /// Capture the current process environment and hostname, bundling the
    /// already-resolved cloud evidence.
    pub fn from_system(cloud: Option<CloudInfo>) -> Self {
        let hostname =
            sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
        Self {
            hostname,
            env_vars: std::env::vars().collect(),
            cloud,
        }
    }
}
