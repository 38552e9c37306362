use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};

use env_detect::EnvironmentType;

use crate::schema::SafetyConfig;

/// One schema problem found during validation.
///
/// Violations are data, not errors: [`validate`] returns the complete list so
/// a caller can display every problem at once instead of fixing them one
/// failed load at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dotted path to the offending field, e.g.
    /// `environment_policies.staging.max_duration_seconds`.
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Load a [`SafetyConfig`] from a YAML file on disk.
///
/// The config is validated after deserialization; a config with any schema
/// violation is rejected wholesale.
pub fn load(path: impl AsRef<Path>) -> Result<SafetyConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read safety config: {}", path.display()))?;
    load_from_str(&contents)
        .with_context(|| format!("failed to parse safety config: {}", path.display()))
}

/// Parse and validate a [`SafetyConfig`] from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<SafetyConfig> {
    let config: SafetyConfig =
        serde_yml::from_str(yaml).context("YAML deserialization failed")?;

    let violations = validate(&config);
    if !violations.is_empty() {
        let listing: Vec<String> = violations.iter().map(ToString::to_string).collect();
        bail!(
            "safety config has {} schema violation(s):\n  {}",
            violations.len(),
            listing.join("\n  ")
        );
    }

    Ok(config)
}

/// Run every schema check and return the complete violation list
/// (empty = valid).
pub fn validate(config: &SafetyConfig) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();

    if config.version != "1.0" {
        violations.push(SchemaViolation::new(
            "version",
            format!(
                "unsupported version '{}'; only '1.0' is supported",
                config.version
            ),
        ));
    }

    // Environment-policy keys must be canonical environment names.
    let mut policy_keys: Vec<&String> = config.environment_policies.keys().collect();
    policy_keys.sort();
    for key in policy_keys {
        if EnvironmentType::from_key(key).is_none() {
            violations.push(SchemaViolation::new(
                format!("environment_policies.{key}"),
                "unrecognized environment type",
            ));
        }
        let policy = &config.environment_policies[key];
        if policy.max_duration_seconds < 0 {
            violations.push(SchemaViolation::new(
                format!("environment_policies.{key}.max_duration_seconds"),
                "must not be negative",
            ));
        }
    }

    // Detection rules need non-empty, unique ids.
    let mut seen_ids = HashSet::new();
    for (index, rule) in config
        .environment_detection
        .classification_rules
        .iter()
        .enumerate()
    {
        let path = format!("environment_detection.classification_rules[{index}]");
        if rule.id.is_empty() {
            violations.push(SchemaViolation::new(format!("{path}.id"), "must not be empty"));
        } else if !seen_ids.insert(&rule.id) {
            violations.push(SchemaViolation::new(
                format!("{path}.id"),
                format!("duplicate rule id '{}'", rule.id),
            ));
        }
    }

    // Experiment-safety bounds must be semantically sensible.
    let mut rule_keys: Vec<&String> = config.experiment_safety.keys().collect();
    rule_keys.sort();
    for key in rule_keys {
        let rule = &config.experiment_safety[key];
        let path = format!("experiment_safety.{key}");

        for (field, value) in [
            ("max_intensity", rule.max_intensity),
            ("max_memory_percentage", rule.max_memory_percentage),
        ] {
            if let Some(v) = value {
                if !(0.0..=100.0).contains(&v) {
                    violations.push(SchemaViolation::new(
                        format!("{path}.{field}"),
                        format!("must be between 0 and 100, got {v}"),
                    ));
                }
            }
        }

        for (field, value) in [
            ("min_available_cores", rule.min_available_cores),
            ("min_free_memory_mb", rule.min_free_memory_mb),
            ("max_latency_ms", rule.max_latency_ms),
        ] {
            if let Some(v) = value {
                if v < 0 {
                    violations.push(SchemaViolation::new(
                        format!("{path}.{field}"),
                        format!("must not be negative, got {v}"),
                    ));
                }
            }
        }
    }

    violations
}
