use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use env_detect::{DetectionResult, EnvironmentType};
use safety_policy::{ExperimentRule, PolicyStore};

use crate::discovery::ProtectedServiceResolver;
use crate::request::ExperimentRequest;
use crate::violation::{EvaluationReport, Violation, ViolationKind};

/// Per-call gating context the evaluator cannot derive from the request
/// itself: whether the caller already confirmed interactively, and any
/// approval token they hold.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    pub confirmed: bool,
    pub approval_token: Option<String>,
}

/// The policy engine: checks one experiment request against the active
/// policy and environment.
///
/// The evaluator is synchronous and side-effect-free given its inputs; the
/// only suspension point is the protected-service lookup, which is
/// timeout-bounded inside the resolver.  It holds no mutable state, so one
/// instance can serve any number of concurrent evaluations.
pub struct SafetyEvaluator {
    store: Arc<PolicyStore>,
    resolver: ProtectedServiceResolver,
}

impl SafetyEvaluator {
    pub fn new(store: Arc<PolicyStore>, resolver: ProtectedServiceResolver) -> Self {
        Self { store, resolver }
    }

    /// Evaluate `request` against the detected environment.
    ///
    /// Every check runs; the violation list is exhaustive so one report is
    /// actionable on its own.  When the experiment file names a
    /// `target.environment` it overrides the detected value (classified
    /// leniently), which keeps the gate honest when detection evidence is
    /// thin but the user has declared intent.
    pub async fn evaluate(
        &self,
        request: &ExperimentRequest,
        detection: &DetectionResult,
        opts: &EvalOptions,
    ) -> EvaluationReport {
        let environment = request
            .target
            .environment
            .as_deref()
            .map(EnvironmentType::classify_name)
            .unwrap_or(detection.environment);

        debug!(
            experiment_type = %request.experiment_type,
            %environment,
            duration = request.duration_seconds,
            "evaluating experiment request"
        );

        let policy = self.store.policy_for(environment);
        let mut violations = Vec::new();
        let mut degraded_backends = Vec::new();

        // 1. Environment kill-switch.
        if !policy.enabled {
            violations.push(Violation::new(
                ViolationKind::EnvironmentDisabled,
                format!("experiments are disabled in the '{environment}' environment"),
                json!({"environment": environment.as_str()}),
            ));
        }

        // 2. Experiment-type allow list.
        if !policy.allowed_experiment_types.contains("*")
            && !policy
                .allowed_experiment_types
                .contains(&request.experiment_type)
        {
            let mut allowed: Vec<&String> = policy.allowed_experiment_types.iter().collect();
            allowed.sort();
            violations.push(Violation::new(
                ViolationKind::TypeNotAllowed,
                format!(
                    "experiment type '{}' is not allowed in the '{environment}' environment",
                    request.experiment_type
                ),
                json!({
                    "experiment_type": request.experiment_type,
                    "allowed_types": allowed,
                }),
            ));
        }

        // 3. Duration cap (inclusive boundary).
        if request.duration_seconds > policy.max_duration_seconds {
            violations.push(Violation::new(
                ViolationKind::DurationExceeded,
                format!(
                    "requested duration {}s exceeds the {}s cap for '{environment}'",
                    request.duration_seconds, policy.max_duration_seconds
                ),
                json!({
                    "requested": request.duration_seconds,
                    "max": policy.max_duration_seconds,
                }),
            ));
        }

        // 4. Protected target service (static set + discovery).
        if let Some(service) = &request.target.service {
            let lookup = self
                .resolver
                .is_protected(service, environment, policy)
                .await;
            degraded_backends = lookup.degraded_backends;
            if lookup.protected {
                violations.push(Violation::new(
                    ViolationKind::ProtectedService,
                    format!("service '{service}' is protected and may not be targeted"),
                    json!({"service": service}),
                ));
            }
        }

        // 5. Type-specific parameter bounds.
        if let Some(rule) = self.store.experiment_rule(&request.experiment_type) {
            check_parameter_bounds(request, rule, &mut violations);
        }

        // 6. Advisory gates.
        if policy.require_confirmation && !opts.confirmed {
            violations.push(Violation::new(
                ViolationKind::ConfirmationRequired,
                format!("the '{environment}' environment requires interactive confirmation"),
                json!({"environment": environment.as_str()}),
            ));
        }
        if policy.require_approval && opts.approval_token.is_none() {
            violations.push(Violation::new(
                ViolationKind::ApprovalRequired,
                format!("the '{environment}' environment requires an approval token"),
                json!({"environment": environment.as_str()}),
            ));
        }

        let allowed = violations.iter().all(|v| !v.is_blocking());
        info!(
            allowed,
            %environment,
            violations = violations.len(),
            degraded = degraded_backends.len(),
            "evaluation complete"
        );

        EvaluationReport {
            allowed,
            environment,
            detection: detection.clone(),
            violations,
            degraded_backends,
        }
    }
}

/// Compare the request's parameters against one experiment rule's bounds.
/// A parameter absent from the request produces no violation; only stated
/// values can be out of range.
fn check_parameter_bounds(
    request: &ExperimentRequest,
    rule: &ExperimentRule,
    violations: &mut Vec<Violation>,
) {
    // Upper bounds: requested value must be <= limit.
    let upper_bounds = [
        ("intensity", rule.max_intensity),
        ("memory_percentage", rule.max_memory_percentage),
        ("latency_ms", rule.max_latency_ms.map(|v| v as f64)),
    ];
    for (field, limit) in upper_bounds {
        if let (Some(limit), Some(requested)) = (limit, request.param_f64(field)) {
            if requested > limit {
                violations.push(Violation::new(
                    ViolationKind::ParameterOutOfRange,
                    format!("{field} {requested} exceeds the limit of {limit}"),
                    json!({"field": field, "requested": requested, "limit": limit}),
                ));
            }
        }
    }

    // Lower bounds: requested value must be >= limit.
    let lower_bounds = [
        ("available_cores", rule.min_available_cores),
        ("free_memory_mb", rule.min_free_memory_mb),
    ];
    for (field, limit) in lower_bounds {
        if let (Some(limit), Some(requested)) = (limit, request.param_f64(field)) {
            if requested < limit as f64 {
                violations.push(Violation::new(
                    ViolationKind::ParameterOutOfRange,
                    format!("{field} {requested} is below the minimum of {limit}"),
                    json!({"field": field, "requested": requested, "limit": limit}),
                ));
            }
        }
    }

    // Interface allow list.
    if let (Some(allowed), Some(interface)) =
        (&rule.allowed_interfaces, request.param_str("interface"))
    {
        if !allowed.iter().any(|i| i == interface) {
            violations.push(Violation::new(
                ViolationKind::ParameterOutOfRange,
                format!("interface '{interface}' is not in the allowed set"),
                json!({"field": "interface", "requested": interface, "allowed": allowed}),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryBackend;
    use anyhow::Result;
    use async_trait::async_trait;
    use safety_policy::loader::load_from_str;
    use std::collections::HashSet;
    use std::time::Duration;

    fn store(yaml: &str) -> Arc<PolicyStore> {
        let config = load_from_str(yaml).expect("test YAML should parse");
        Arc::new(PolicyStore::from_config(&config).expect("store should build"))
    }

    fn detection(environment: EnvironmentType) -> DetectionResult {
        DetectionResult {
            environment,
            matched_rules: vec![],
            cloud_provider: None,
        }
    }

    fn request(yaml: &str) -> ExperimentRequest {
        ExperimentRequest::from_str(yaml).expect("test request should parse")
    }

    fn evaluator(store: Arc<PolicyStore>) -> SafetyEvaluator {
        SafetyEvaluator::new(store, ProtectedServiceResolver::static_only())
    }

    fn kinds(report: &EvaluationReport) -> Vec<ViolationKind> {
        report.violations.iter().map(|v| v.kind).collect()
    }

    const PERMISSIVE_STAGING: &str = r#"
version: "1.0"
environment_policies:
  staging:
    enabled: true
    max_duration_seconds: 1800
    allowed_experiment_types: ["*"]
"#;

    // Scenario A: disabled production environment blocks everything.
    #[tokio::test]
    async fn disabled_environment_blocks_any_request() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  production:
    enabled: false
    max_duration_seconds: 86400
    allowed_experiment_types: ["*"]
"#,
        );
        let report = evaluator(store)
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 60\nintensity: 10"),
                &detection(EnvironmentType::Production),
                &EvalOptions::default(),
            )
            .await;

        assert!(!report.allowed);
        assert_eq!(kinds(&report), vec![ViolationKind::EnvironmentDisabled]);
    }

    // Scenario B: duration cap with both values in the details.
    #[tokio::test]
    async fn duration_cap_carries_both_values() {
        let report = evaluator(store(PERMISSIVE_STAGING))
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 7200"),
                &detection(EnvironmentType::Staging),
                &EvalOptions::default(),
            )
            .await;

        assert!(!report.allowed);
        let v = report
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::DurationExceeded)
            .expect("duration violation expected");
        assert_eq!(v.details["requested"], serde_json::json!(7200));
        assert_eq!(v.details["max"], serde_json::json!(1800));
    }

    // Duration boundary is inclusive.
    #[tokio::test]
    async fn duration_boundary_is_inclusive() {
        let evaluator = evaluator(store(PERMISSIVE_STAGING));
        let detection = detection(EnvironmentType::Staging);

        let at_cap = evaluator
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 1800"),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        assert!(!at_cap
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::DurationExceeded));
        assert!(at_cap.allowed);

        let over_cap = evaluator
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 1801"),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        assert_eq!(
            over_cap
                .violations
                .iter()
                .filter(|v| v.kind == ViolationKind::DurationExceeded)
                .count(),
            1
        );
    }

    // Scenario C: statically protected service.
    #[tokio::test]
    async fn statically_protected_service_is_blocked() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  staging:
    enabled: true
    max_duration_seconds: 1800
    allowed_experiment_types: ["*"]
    protected_services: ["database"]
"#,
        );
        let report = evaluator(store)
            .evaluate(
                &request(
                    "type: cpu_stress\ntarget:\n  service: database\nduration: 300",
                ),
                &detection(EnvironmentType::Staging),
                &EvalOptions::default(),
            )
            .await;

        assert!(!report.allowed);
        let v = report
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::ProtectedService)
            .expect("protected-service violation expected");
        assert_eq!(v.details["service"], serde_json::json!("database"));
    }

    // Scenario D / D': parameter bound with inclusive boundary.
    #[tokio::test]
    async fn parameter_bound_violation_and_boundary() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  development:
    enabled: true
    max_duration_seconds: 3600
    allowed_experiment_types: ["*"]
experiment_safety:
  cpu_stress:
    max_intensity: 90
"#,
        );
        let evaluator = evaluator(store);
        let detection = detection(EnvironmentType::Development);

        let over = evaluator
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 300\nintensity: 95"),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        let v = over
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::ParameterOutOfRange)
            .expect("parameter violation expected");
        assert_eq!(v.details["field"], serde_json::json!("intensity"));
        assert_eq!(v.details["requested"].as_f64(), Some(95.0));
        assert_eq!(v.details["limit"].as_f64(), Some(90.0));

        let at_limit = evaluator
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 300\nintensity: 90"),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        assert!(!at_limit
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::ParameterOutOfRange));
    }

    // Scenario E: one backend times out, the other still protects.
    #[tokio::test(start_paused = true)]
    async fn discovery_timeout_does_not_mask_other_backends() {
        struct Hanging;
        #[async_trait]
        impl DiscoveryBackend for Hanging {
            fn name(&self) -> &str {
                "kubernetes"
            }
            async fn list_protected_service_names(
                &self,
                _environment: EnvironmentType,
            ) -> Result<HashSet<String>> {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(HashSet::new())
            }
        }
        struct KnowsAuth;
        #[async_trait]
        impl DiscoveryBackend for KnowsAuth {
            fn name(&self) -> &str {
                "consul"
            }
            async fn list_protected_service_names(
                &self,
                _environment: EnvironmentType,
            ) -> Result<HashSet<String>> {
                Ok(HashSet::from(["auth-service".to_string()]))
            }
        }

        let resolver = ProtectedServiceResolver::new(
            vec![Arc::new(Hanging), Arc::new(KnowsAuth)],
            Duration::from_secs(5),
        );
        let evaluator = SafetyEvaluator::new(store(PERMISSIVE_STAGING), resolver);
        let detection = detection(EnvironmentType::Staging);

        let report = evaluator
            .evaluate(
                &request("type: cpu_stress\ntarget:\n  service: auth-service\nduration: 300"),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        assert!(kinds(&report).contains(&ViolationKind::ProtectedService));
        assert_eq!(report.degraded_backends, vec!["kubernetes".to_string()]);

        let report = evaluator
            .evaluate(
                &request(
                    "type: cpu_stress\ntarget:\n  service: unrelated-service\nduration: 300",
                ),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        assert!(!kinds(&report).contains(&ViolationKind::ProtectedService));
        assert!(report.allowed);
        assert_eq!(report.degraded_backends, vec!["kubernetes".to_string()]);
    }

    #[tokio::test]
    async fn type_allow_list_without_wildcard() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  staging:
    enabled: true
    max_duration_seconds: 1800
    allowed_experiment_types: ["network_latency"]
"#,
        );
        let report = evaluator(store)
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 300"),
                &detection(EnvironmentType::Staging),
                &EvalOptions::default(),
            )
            .await;
        assert!(!report.allowed);
        assert_eq!(kinds(&report), vec![ViolationKind::TypeNotAllowed]);
    }

    #[tokio::test]
    async fn advisory_gates_do_not_block() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  staging:
    enabled: true
    max_duration_seconds: 1800
    allowed_experiment_types: ["*"]
    require_confirmation: true
    require_approval: true
"#,
        );
        let evaluator = evaluator(store);
        let detection = detection(EnvironmentType::Staging);
        let req = request("type: cpu_stress\ntarget: {}\nduration: 300");

        let report = evaluator
            .evaluate(&req, &detection, &EvalOptions::default())
            .await;
        assert!(report.allowed, "advisory gates must not deny the request");
        assert_eq!(report.advisory_violations().count(), 2);

        // Supplying confirmation and a token clears both gates.
        let opts = EvalOptions {
            confirmed: true,
            approval_token: Some("CHG-1234".to_string()),
        };
        let report = evaluator.evaluate(&req, &detection, &opts).await;
        assert!(report.violations.is_empty());
    }

    #[tokio::test]
    async fn unknown_environment_gets_the_restrictive_default() {
        // No policies configured at all: everything falls back to disabled.
        let report = evaluator(store(r#"version: "1.0""#))
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 10"),
                &detection(EnvironmentType::Unknown),
                &EvalOptions::default(),
            )
            .await;
        assert!(!report.allowed);
        assert!(kinds(&report).contains(&ViolationKind::EnvironmentDisabled));
    }

    #[tokio::test]
    async fn target_environment_override_beats_detection() {
        // Detection says development, but the experiment file names a
        // production-looking environment; the production policy (absent, so
        // restrictive) must apply.
        let store = store(
            r#"
version: "1.0"
environment_policies:
  development:
    enabled: true
    max_duration_seconds: 3600
    allowed_experiment_types: ["*"]
"#,
        );
        let report = evaluator(store)
            .evaluate(
                &request(
                    "type: cpu_stress\ntarget:\n  environment: prod-east\nduration: 60",
                ),
                &detection(EnvironmentType::Development),
                &EvalOptions::default(),
            )
            .await;
        assert_eq!(report.environment, EnvironmentType::Production);
        assert!(!report.allowed);
    }

    #[tokio::test]
    async fn all_checks_run_for_one_exhaustive_report() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  staging:
    enabled: false
    max_duration_seconds: 600
    allowed_experiment_types: ["network_latency"]
    protected_services: ["database"]
experiment_safety:
  cpu_stress:
    max_intensity: 50
"#,
        );
        let report = evaluator(store)
            .evaluate(
                &request(
                    "type: cpu_stress\ntarget:\n  service: database\nduration: 7200\nintensity: 80",
                ),
                &detection(EnvironmentType::Staging),
                &EvalOptions::default(),
            )
            .await;

        // One report carries every problem at once.
        assert_eq!(
            kinds(&report),
            vec![
                ViolationKind::EnvironmentDisabled,
                ViolationKind::TypeNotAllowed,
                ViolationKind::DurationExceeded,
                ViolationKind::ProtectedService,
                ViolationKind::ParameterOutOfRange,
            ]
        );
    }

    #[tokio::test]
    async fn evaluation_is_idempotent() {
        let evaluator = evaluator(store(PERMISSIVE_STAGING));
        let detection = detection(EnvironmentType::Staging);
        let req = request("type: cpu_stress\ntarget: {}\nduration: 7200");

        let first = evaluator
            .evaluate(&req, &detection, &EvalOptions::default())
            .await;
        let second = evaluator
            .evaluate(&req, &detection, &EvalOptions::default())
            .await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn interface_allow_list_is_enforced() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  test:
    enabled: true
    max_duration_seconds: 3600
    allowed_experiment_types: ["*"]
experiment_safety:
  network_latency:
    max_latency_ms: 500
    allowed_interfaces: ["eth0"]
"#,
        );
        let evaluator = evaluator(store);
        let detection = detection(EnvironmentType::Test);

        let report = evaluator
            .evaluate(
                &request(
                    "type: network_latency\ntarget: {}\nduration: 60\ninterface: wlan0\nlatency_ms: 100",
                ),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        let v = report
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::ParameterOutOfRange)
            .expect("interface violation expected");
        assert_eq!(v.details["field"], serde_json::json!("interface"));
        assert_eq!(v.details["requested"], serde_json::json!("wlan0"));

        let report = evaluator
            .evaluate(
                &request(
                    "type: network_latency\ntarget: {}\nduration: 60\ninterface: eth0\nlatency_ms: 100",
                ),
                &detection,
                &EvalOptions::default(),
            )
            .await;
        assert!(report.violations.is_empty());
    }

    #[tokio::test]
    async fn absent_parameters_cannot_violate_bounds() {
        let store = store(
            r#"
version: "1.0"
environment_policies:
  test:
    enabled: true
    max_duration_seconds: 3600
    allowed_experiment_types: ["*"]
experiment_safety:
  cpu_stress:
    max_intensity: 90
    min_available_cores: 2
"#,
        );
        // Request states neither intensity nor available_cores.
        let report = evaluator(store)
            .evaluate(
                &request("type: cpu_stress\ntarget: {}\nduration: 60"),
                &detection(EnvironmentType::Test),
                &EvalOptions::default(),
            )
            .await;
        assert!(report.violations.is_empty());
    }
}
