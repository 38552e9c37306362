use serde::{Deserialize, Serialize};

/// Coarse-grained classification of the execution context.
///
/// `Unknown` is the safe default when no detection rule matches and is
/// treated at least as restrictively as `Production` by the policy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentType {
    Production,
    Staging,
    Development,
    Test,
    Unknown,
}

impl EnvironmentType {
    /// Canonical lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Staging => "staging",
            EnvironmentType::Development => "development",
            EnvironmentType::Test => "test",
            EnvironmentType::Unknown => "unknown",
        }
    }

    /// Strict parse of a canonical environment name, as used for
    /// `environment_policies` keys.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "production" => Some(EnvironmentType::Production),
            "staging" => Some(EnvironmentType::Staging),
            "development" => Some(EnvironmentType::Development),
            "test" => Some(EnvironmentType::Test),
            "unknown" => Some(EnvironmentType::Unknown),
            _ => None,
        }
    }

    /// Lenient classification of a free-form environment name, e.g. the
    /// `target.environment` field of an experiment file.
    ///
    /// Substring identifiers ("prod-east" is production, "stg-eu" is
    /// staging). Names that match nothing classify as `Unknown`, which the
    /// policy layer treats restrictively.
    pub fn classify_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if ["prod", "prd"].iter().any(|id| lower.contains(id)) {
            EnvironmentType::Production
        } else if ["stag", "stg"].iter().any(|id| lower.contains(id)) {
            EnvironmentType::Staging
        } else if lower.contains("dev") {
            EnvironmentType::Development
        } else if lower.contains("test") {
            EnvironmentType::Test
        } else {
            EnvironmentType::Unknown
        }
    }
}

impl std::fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The evidence source a [`DetectionRule`] matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Exact `KEY=VALUE` equality against a process environment variable.
    EnvVar,
    /// Case-sensitive glob against the local hostname.
    HostnamePattern,
    /// `key=value-glob` against cloud instance tags.
    CloudTag,
    /// Exact equality against the detected cloud provider name.
    CloudProvider,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSource::EnvVar => "env_var",
            RuleSource::HostnamePattern => "hostname_pattern",
            RuleSource::CloudTag => "cloud_tag",
            RuleSource::CloudProvider => "cloud_provider",
        }
    }
}

/// A single classification rule, immutable once loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    /// Unique identifier, referenced in [`MatchedRule`] diagnostics.
    pub id: String,
    /// Which evidence this rule examines.
    pub source: RuleSource,
    /// Pattern with per-source semantics, see [`RuleSource`].
    pub pattern: String,
    /// Environment the rule resolves to when it matches.
    pub target_environment: EnvironmentType,
    /// Lower numeric priority is evaluated first. Default 100.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    100
}

/// Diagnostic record of one rule that matched during detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,
    pub source: RuleSource,
    pub pattern: String,
    /// The evidence value the pattern matched, e.g. `DEPLOY_ENV=staging`.
    pub observed_value: String,
}

/// The complete outcome of one detection pass.
///
/// Produced fresh per call and never cached: the underlying evidence
/// (hostname, environment variables) can change between processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// The resolved environment; fixed by the first matching rule.
    pub environment: EnvironmentType,
    /// Every rule that matched, in priority order, for diagnostics.
    pub matched_rules: Vec<MatchedRule>,
    /// Cloud provider name when a metadata probe succeeded.
    pub cloud_provider: Option<String>,
}
