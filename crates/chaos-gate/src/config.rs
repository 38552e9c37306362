use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_safety_file")]
    pub safety_file: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            safety_file: default_safety_file(),
            logging: LoggingConfig::default(),
            detection: DetectionConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DetectionConfig {
    /// Upper bound on the whole cloud-probing race, in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryConfig {
    /// Per-backend timeout for protected-service lookups, in seconds.
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: default_backend_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_safety_file() -> PathBuf {
    PathBuf::from("safety.yaml")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_backend_timeout() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load gate configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned and a
/// warning is emitted. This allows chaos-gate to start with sensible defaults
/// when no config file has been written yet.
pub fn load(path: &Path) -> anyhow::Result<GateConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(GateConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: GateConfig = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load(Path::new("/nonexistent/chaos-gate.yaml")).unwrap();
        assert_eq!(config.safety_file, PathBuf::from("safety.yaml"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.detection.probe_timeout_secs, 5);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: GateConfig = serde_yml::from_str(
            r#"
safety_file: "/etc/chaos-gate/safety.yaml"
logging:
  level: debug
"#,
        )
        .unwrap();
        assert_eq!(
            config.safety_file,
            PathBuf::from("/etc/chaos-gate/safety.yaml")
        );
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.audit_log_path, PathBuf::from("audit.jsonl"));
        assert_eq!(config.discovery.backend_timeout_secs, 5);
    }
}
