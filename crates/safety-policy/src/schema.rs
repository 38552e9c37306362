use std::collections::HashMap;

use serde::Deserialize;

use env_detect::{DetectionRule, ProbeConfig};

/// Top-level safety configuration loaded from a YAML file.
///
/// Numeric fields are deserialized as signed integers so that out-of-range
/// values survive parsing and can be reported together by
/// [`loader::validate`](crate::loader::validate); the typed, unsigned
/// representation lives in [`store`](crate::store).
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    /// Schema version; currently must be "1.0".
    pub version: String,
    /// Environment-detection rules and cloud-probe endpoints.
    #[serde(default)]
    pub environment_detection: DetectionSection,
    /// One policy per environment type, keyed by canonical name.
    #[serde(default)]
    pub environment_policies: HashMap<String, RawPolicy>,
    /// Per-experiment-type parameter bounds, keyed by experiment type.
    #[serde(default)]
    pub experiment_safety: HashMap<String, RawExperimentRule>,
    /// Dynamic protected-service discovery backends.
    #[serde(default)]
    pub service_discovery: DiscoverySection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionSection {
    /// Cloud metadata endpoints to probe, keyed by provider (aws/gcp/azure).
    #[serde(default)]
    pub cloud_providers: HashMap<String, ProbeConfig>,
    /// Ordered classification rules; lower priority evaluated first.
    #[serde(default)]
    pub classification_rules: Vec<DetectionRule>,
}

/// One environment's safety policy as it appears in the YAML file.
///
/// Every field defaults to its most restrictive value, so an empty policy
/// block disables experiments outright.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_duration_seconds: i64,
    #[serde(default)]
    pub allowed_experiment_types: Vec<String>,
    #[serde(default)]
    pub protected_services: Vec<String>,
    #[serde(default)]
    pub require_confirmation: bool,
    #[serde(default)]
    pub require_approval: bool,
}

/// Per-experiment-type parameter bounds.  All fields are optional; an absent
/// field means no bound of that kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExperimentRule {
    pub max_intensity: Option<f64>,
    pub min_available_cores: Option<i64>,
    pub max_memory_percentage: Option<f64>,
    pub min_free_memory_mb: Option<i64>,
    pub max_latency_ms: Option<i64>,
    pub allowed_interfaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverySection {
    pub kubernetes: Option<KubernetesDiscovery>,
    pub consul: Option<ConsulDiscovery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesDiscovery {
    #[serde(default)]
    pub enabled: bool,
    /// Cluster-system services to protect when running inside Kubernetes.
    #[serde(default = "default_k8s_protected")]
    pub protected_services: Vec<String>,
}

fn default_k8s_protected() -> Vec<String> {
    [
        "kube-dns",
        "kube-proxy",
        "kubernetes-dashboard",
        "monitoring-prometheus",
        "monitoring-grafana",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsulDiscovery {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_consul_url")]
    pub url: String,
    /// A service carrying any of these catalog tags is protected.
    #[serde(default)]
    pub protected_service_tags: Vec<String>,
    #[serde(default = "default_discovery_timeout")]
    pub timeout_seconds: u64,
}

fn default_consul_url() -> String {
    "http://localhost:8500".to_string()
}

fn default_discovery_timeout() -> u64 {
    5
}
