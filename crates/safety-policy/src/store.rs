use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use tracing::debug;

use env_detect::EnvironmentType;

use crate::loader;
use crate::schema::SafetyConfig;

/// A validated, typed safety policy for one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyPolicy {
    /// When false, no experiment may run in this environment.
    pub enabled: bool,
    /// Inclusive upper bound on experiment duration.
    pub max_duration_seconds: u64,
    /// Experiment types that may run; `"*"` allows all.
    pub allowed_experiment_types: HashSet<String>,
    /// Statically protected service names; `"*"` protects everything.
    pub protected_services: HashSet<String>,
    /// Interactive confirmation gate (advisory).
    pub require_confirmation: bool,
    /// Approval-token gate (advisory).
    pub require_approval: bool,
}

impl SafetyPolicy {
    /// The built-in most-restrictive policy, applied to any environment
    /// without an explicit entry: disabled, nothing allowed, everything
    /// protected, both advisory gates required.
    pub fn restrictive() -> Self {
        Self {
            enabled: false,
            max_duration_seconds: 0,
            allowed_experiment_types: HashSet::new(),
            protected_services: HashSet::from(["*".to_string()]),
            require_confirmation: true,
            require_approval: true,
        }
    }
}

/// Validated per-experiment-type parameter bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentRule {
    pub max_intensity: Option<f64>,
    pub min_available_cores: Option<u64>,
    pub max_memory_percentage: Option<f64>,
    pub min_free_memory_mb: Option<u64>,
    pub max_latency_ms: Option<u64>,
    pub allowed_interfaces: Option<Vec<String>>,
}

/// Read-only holder of every loaded policy and experiment rule.
///
/// Built once per process from a validated [`SafetyConfig`] and thereafter
/// shared immutably across any number of concurrent evaluations; there is no
/// writer after load, so no locking.
#[derive(Debug)]
pub struct PolicyStore {
    policies: HashMap<EnvironmentType, SafetyPolicy>,
    experiment_rules: HashMap<String, ExperimentRule>,
    restrictive_default: SafetyPolicy,
}

impl PolicyStore {
    /// Build a store from a config, re-running validation first.  A config
    /// with schema violations is never partially applied.
    pub fn from_config(config: &SafetyConfig) -> Result<Self> {
        let violations = loader::validate(config);
        if !violations.is_empty() {
            let listing: Vec<String> = violations.iter().map(ToString::to_string).collect();
            bail!(
                "refusing to build policy store from invalid config:\n  {}",
                listing.join("\n  ")
            );
        }

        let mut policies = HashMap::new();
        for (key, raw) in &config.environment_policies {
            // Keys are canonical after validation.
            let Some(env) = EnvironmentType::from_key(key) else {
                continue;
            };
            policies.insert(
                env,
                SafetyPolicy {
                    enabled: raw.enabled,
                    max_duration_seconds: raw.max_duration_seconds as u64,
                    allowed_experiment_types: raw
                        .allowed_experiment_types
                        .iter()
                        .cloned()
                        .collect(),
                    protected_services: raw.protected_services.iter().cloned().collect(),
                    require_confirmation: raw.require_confirmation,
                    require_approval: raw.require_approval,
                },
            );
        }

        let mut experiment_rules = HashMap::new();
        for (experiment_type, raw) in &config.experiment_safety {
            experiment_rules.insert(
                experiment_type.clone(),
                ExperimentRule {
                    max_intensity: raw.max_intensity,
                    min_available_cores: raw.min_available_cores.map(|v| v as u64),
                    max_memory_percentage: raw.max_memory_percentage,
                    min_free_memory_mb: raw.min_free_memory_mb.map(|v| v as u64),
                    max_latency_ms: raw.max_latency_ms.map(|v| v as u64),
                    allowed_interfaces: raw.allowed_interfaces.clone(),
                },
            );
        }

        debug!(
            policies = policies.len(),
            experiment_rules = experiment_rules.len(),
            "policy store built"
        );

        Ok(Self {
            policies,
            experiment_rules,
            restrictive_default: SafetyPolicy::restrictive(),
        })
    }

    /// The policy for `environment`, falling back to the built-in
    /// restrictive default when no entry exists.
    pub fn policy_for(&self, environment: EnvironmentType) -> &SafetyPolicy {
        self.policies
            .get(&environment)
            .unwrap_or(&self.restrictive_default)
    }

    /// Extra parameter bounds for `experiment_type`, if configured.
    pub fn experiment_rule(&self, experiment_type: &str) -> Option<&ExperimentRule> {
        self.experiment_rules.get(experiment_type)
    }

    /// Sorted canonical names of the environments with an explicit policy.
    pub fn configured_environments(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.policies.keys().map(EnvironmentType::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_from_str;

    fn store_from_yaml(yaml: &str) -> PolicyStore {
        let config = load_from_str(yaml).expect("test YAML should parse");
        PolicyStore::from_config(&config).expect("store construction should succeed")
    }

    #[test]
    fn missing_environment_falls_back_to_restrictive_default() {
        let store = store_from_yaml(
            r#"
version: "1.0"
environment_policies:
  staging:
    enabled: true
    max_duration_seconds: 1800
"#,
        );

        let prod = store.policy_for(EnvironmentType::Production);
        assert!(!prod.enabled);
        assert_eq!(prod.max_duration_seconds, 0);
        assert!(prod.protected_services.contains("*"));
        assert!(prod.require_confirmation);
        assert!(prod.require_approval);

        let unknown = store.policy_for(EnvironmentType::Unknown);
        assert_eq!(unknown, &SafetyPolicy::restrictive());
    }

    #[test]
    fn configured_environment_is_returned() {
        let store = store_from_yaml(
            r#"
version: "1.0"
environment_policies:
  development:
    enabled: true
    max_duration_seconds: 3600
    allowed_experiment_types: ["*"]
"#,
        );
        let dev = store.policy_for(EnvironmentType::Development);
        assert!(dev.enabled);
        assert_eq!(dev.max_duration_seconds, 3600);
        assert!(dev.allowed_experiment_types.contains("*"));
        assert!(dev.protected_services.is_empty());
    }

    #[test]
    fn experiment_rules_are_typed() {
        let store = store_from_yaml(
            r#"
version: "1.0"
experiment_safety:
  cpu_stress:
    max_intensity: 90
    min_available_cores: 2
  network_latency:
    max_latency_ms: 500
    allowed_interfaces: ["eth0", "eth1"]
"#,
        );

        let cpu = store.experiment_rule("cpu_stress").unwrap();
        assert_eq!(cpu.max_intensity, Some(90.0));
        assert_eq!(cpu.min_available_cores, Some(2));

        let net = store.experiment_rule("network_latency").unwrap();
        assert_eq!(net.max_latency_ms, Some(500));
        assert_eq!(
            net.allowed_interfaces.as_deref(),
            Some(["eth0".to_string(), "eth1".to_string()].as_slice())
        );

        assert!(store.experiment_rule("disk_fill").is_none());
    }

    #[test]
    fn invalid_config_never_becomes_a_store() {
        let yaml = r#"
version: "1.0"
experiment_safety:
  cpu_stress:
    max_intensity: 150
"#;
        let config: SafetyConfig = serde_yml::from_str(yaml).unwrap();
        let err = PolicyStore::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("refusing to build policy store"));
    }
}
