use tracing::{debug, trace};

use crate::context::DetectionContext;
use crate::matcher;
use crate::rules::{DetectionResult, DetectionRule, EnvironmentType, MatchedRule, RuleSource};

/// Evaluates the configured classification rules against a
/// [`DetectionContext`] snapshot.
///
/// Rules are held sorted by ascending priority (stable, so configuration
/// order breaks ties).  The first matching rule fixes the resolved
/// environment; evaluation continues past it only to collect the remaining
/// matches for diagnostics -- a later, lower-priority match never overwrites
/// the resolved value.
#[derive(Debug)]
pub struct EnvironmentDetector {
    /// Rules sorted by ascending priority (lowest number evaluated first).
    sorted_rules: Vec<DetectionRule>,
}

impl EnvironmentDetector {
    /// Create a detector from the configured rule list.
    pub fn new(mut rules: Vec<DetectionRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { sorted_rules: rules }
    }

    /// Number of loaded rules.
    pub fn rule_count(&self) -> usize {
        self.sorted_rules.len()
    }

    /// Classify the snapshot.  Zero matches resolve to
    /// [`EnvironmentType::Unknown`].
    pub fn detect(&self, ctx: &DetectionContext) -> DetectionResult {
        let mut environment: Option<EnvironmentType> = None;
        let mut matched_rules = Vec::new();

        for rule in &self.sorted_rules {
            let observed = match rule.source {
                RuleSource::EnvVar => matcher::match_env_var(&rule.pattern, &ctx.env_vars),
                RuleSource::HostnamePattern => {
                    matcher::match_hostname(&rule.pattern, &ctx.hostname)
                }
                RuleSource::CloudTag => ctx
                    .cloud
                    .as_ref()
                    .and_then(|c| matcher::match_cloud_tag(&rule.pattern, &c.tags)),
                RuleSource::CloudProvider => ctx
                    .cloud
                    .as_ref()
                    .and_then(|c| matcher::match_cloud_provider(&rule.pattern, &c.provider)),
            };

            if let Some(observed_value) = observed {
                trace!(rule_id = %rule.id, %observed_value, "detection rule matched");
                if environment.is_none() {
                    environment = Some(rule.target_environment);
                }
                matched_rules.push(MatchedRule {
                    rule_id: rule.id.clone(),
                    source: rule.source,
                    pattern: rule.pattern.clone(),
                    observed_value,
                });
            }
        }

        let environment = environment.unwrap_or(EnvironmentType::Unknown);
        debug!(
            environment = %environment,
            matched = matched_rules.len(),
            hostname = %ctx.hostname,
            "environment detection complete"
        );

        DetectionResult {
            environment,
            matched_rules,
            cloud_provider: ctx.cloud.as_ref().map(|c| c.provider.clone()),
        }
    }
}
