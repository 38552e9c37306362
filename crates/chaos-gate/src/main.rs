mod cli;
mod config;
mod template;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use audit_trail::{AuditEntry, AuditEventType, AuditSink, AuditSource, EvaluationRecord};
use env_detect::{
    build_probes, probe_any, DetectionContext, DetectionResult, EnvironmentDetector,
};
use safety_eval::{
    ConsulBackend, DiscoveryBackend, EvalOptions, EvaluationReport, ExperimentRequest,
    KubernetesBackend, ProtectedServiceResolver, SafetyEvaluator,
};
use safety_policy::{PolicyStore, SafetyConfig};

use crate::cli::{Cli, Command};
use crate::config::GateConfig;

const COMPONENT: &str = "chaos-gate";

// ---------------------------------------------------------------------------
// Environment detection wiring
// ---------------------------------------------------------------------------

/// Probe the configured cloud metadata endpoints, gather local evidence, and
/// run the classification rules.
///
/// Probing failure is not an error: with no cloud evidence the rules that
/// need it simply cannot match and detection falls through to the remaining
/// evidence sources.
async fn detect_environment(safety: &SafetyConfig, probe_timeout: Duration) -> DetectionResult {
    let probes = build_probes(&safety.environment_detection.cloud_providers);
    let cloud = probe_any(probes, probe_timeout).await;
    let ctx = DetectionContext::from_system(cloud);
    let detector =
        EnvironmentDetector::new(safety.environment_detection.classification_rules.clone());
    detector.detect(&ctx)
}

/// Build the discovery backends enabled in the safety document.
fn build_backends(safety: &SafetyConfig) -> Result<Vec<Arc<dyn DiscoveryBackend>>> {
    let mut backends: Vec<Arc<dyn DiscoveryBackend>> = Vec::new();

    if let Some(k8s) = &safety.service_discovery.kubernetes {
        if k8s.enabled {
            backends.push(Arc::new(KubernetesBackend::new(k8s)));
        }
    }
    if let Some(consul) = &safety.service_discovery.consul {
        if consul.enabled {
            backends.push(Arc::new(
                ConsulBackend::new(consul).context("failed to initialize Consul backend")?,
            ));
        }
    }

    Ok(backends)
}

// ---------------------------------------------------------------------------
// Verdict output
// ---------------------------------------------------------------------------

/// Print the human-readable verdict for one evaluation.
fn print_verdict(request: &ExperimentRequest, report: &EvaluationReport) {
    let name = request.name.as_deref().unwrap_or(&request.experiment_type);
    if report.allowed {
        println!("ALLOWED: '{name}' in the {} environment", report.environment);
    } else {
        println!("BLOCKED: '{name}' in the {} environment", report.environment);
    }

    for violation in &report.violations {
        let marker = if violation.is_blocking() { "violation" } else { "advisory" };
        println!("  [{marker}] {}: {}", violation.kind.as_str(), violation.message);
    }
    for backend in &report.degraded_backends {
        println!("  [degraded] discovery backend '{backend}' was unavailable");
    }
}

/// Exit code for a `check` run: 0 only when the experiment is allowed and no
/// advisory gate remains unsatisfied.
fn exit_code(report: &EvaluationReport) -> i32 {
    if report.allowed && report.advisory_violations().count() == 0 {
        0
    } else {
        1
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn run_check(
    cfg: &GateConfig,
    safety: &SafetyConfig,
    store: Arc<PolicyStore>,
    detection: DetectionResult,
    audit: &AuditSink,
    experiment: &std::path::Path,
    opts: EvalOptions,
    json: bool,
) -> Result<i32> {
    // Load the experiment definition.
    let request = ExperimentRequest::load(experiment)?;

    // Build the protected-service resolver and the evaluator.
    let resolver = ProtectedServiceResolver::new(
        build_backends(safety)?,
        Duration::from_secs(cfg.discovery.backend_timeout_secs),
    );
    let evaluator = SafetyEvaluator::new(store, resolver);

    let report = evaluator.evaluate(&request, &detection, &opts).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_verdict(&request, &report);
    }

    // Audit every evaluation with the full report attached, then a
    // verdict-specific entry for log processors that only filter outcomes.
    let record = EvaluationRecord {
        allowed: report.allowed,
        environment: report.environment.to_string(),
        violation_kinds: report
            .violations
            .iter()
            .map(|v| v.kind.as_str().to_string())
            .collect(),
    };
    let source = || {
        AuditSource::new(COMPONENT)
            .with_experiment(request.name.as_deref().unwrap_or(&request.experiment_type))
    };
    audit
        .log(
            AuditEntry::new(
                AuditEventType::ExperimentEvaluated,
                source(),
                serde_json::to_value(&report)?,
            )
            .with_evaluation(record.clone()),
        )
        .await;

    let event_type = if !report.allowed {
        AuditEventType::ExperimentBlocked
    } else if report.advisory_violations().count() > 0 {
        AuditEventType::ConfirmationPending
    } else {
        AuditEventType::ExperimentAllowed
    };
    audit
        .log(
            AuditEntry::new(
                event_type,
                source(),
                serde_json::json!({
                    "blocking_violations": report.blocking_violations().count(),
                    "advisory_violations": report.advisory_violations().count(),
                    "degraded_backends": report.degraded_backends,
                }),
            )
            .with_evaluation(record),
        )
        .await;

    Ok(exit_code(&report))
}

fn print_detection(detection: &DetectionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(detection)?);
        return Ok(());
    }

    println!("environment: {}", detection.environment);
    if let Some(provider) = &detection.cloud_provider {
        println!("cloud provider: {provider}");
    }
    for matched in &detection.matched_rules {
        println!(
            "  matched '{}' ({}): {}",
            matched.rule_id,
            matched.source.as_str(),
            matched.observed_value
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load gate config; --verbose overrides the configured level.
    let cfg = config::load(&cli.config)?;
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        cfg.logging.level.clone()
    };

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(
        config_file = %cli.config.display(),
        safety_file = %cfg.safety_file.display(),
        "chaos-gate starting"
    );

    // Template generation needs no policy, detection, or audit machinery.
    if let Command::Template {
        template_type,
        output,
    } = &cli.command
    {
        return template::write(*template_type, output);
    }

    // 4. Start the audit trail.
    let (audit, audit_handle) = AuditSink::start(&cfg.logging.audit_log_path)
        .await
        .context("failed to start audit trail")?;

    audit
        .log(AuditEntry::new(
            AuditEventType::GateStarted,
            AuditSource::new(COMPONENT),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
            }),
        ))
        .await;

    // 5. Load the safety document and build the immutable policy store.
    let safety = safety_policy::loader::load(&cfg.safety_file)
        .context("failed to load safety configuration")?;
    let store = Arc::new(
        PolicyStore::from_config(&safety).context("failed to build policy store")?,
    );

    audit
        .log(AuditEntry::new(
            AuditEventType::ConfigLoaded,
            AuditSource::new(COMPONENT),
            serde_json::json!({
                "safety_file": cfg.safety_file.display().to_string(),
                "configured_environments": store.configured_environments(),
            }),
        ))
        .await;

    // 6. Detect the environment (cloud probing + classification rules).
    let detection = detect_environment(
        &safety,
        Duration::from_secs(cfg.detection.probe_timeout_secs),
    )
    .await;

    info!(
        environment = %detection.environment,
        matched = detection.matched_rules.len(),
        cloud = ?detection.cloud_provider,
        "environment detected"
    );

    audit
        .log(
            AuditEntry::new(
                AuditEventType::EnvironmentDetected,
                AuditSource::new(COMPONENT),
                serde_json::to_value(&detection)?,
            ),
        )
        .await;

    // 7. Dispatch the subcommand.
    let outcome = match &cli.command {
        Command::Check {
            experiment,
            yes,
            approval_token,
            json,
        } => {
            let opts = EvalOptions {
                confirmed: *yes,
                approval_token: approval_token.clone(),
            };
            run_check(
                &cfg, &safety, store, detection, &audit, experiment, opts, *json,
            )
            .await
        }
        Command::DetectEnv { json } => print_detection(&detection, *json).map(|()| 0),
        Command::Template { .. } => unreachable!("handled before wiring"),
    };

    // 8. Log shutdown and drain the audit writer, on success and failure
    //    alike, so buffered entries survive the error path too.
    shutdown_audit(audit, audit_handle, &outcome).await;

    std::process::exit(outcome?);
}

/// Emit the final `GateStopped` entry and wait for the audit writer to drain
/// before the process exits.
async fn shutdown_audit(
    audit: AuditSink,
    handle: tokio::task::JoinHandle<()>,
    outcome: &Result<i32>,
) {
    let details = match outcome {
        Ok(code) => serde_json::json!({"exit_code": code}),
        Err(err) => serde_json::json!({"error": format!("{err:#}")}),
    };
    audit
        .log(AuditEntry::new(
            AuditEventType::GateStopped,
            AuditSource::new(COMPONENT),
            details,
        ))
        .await;
    drop(audit);
    handle.await.ok();
}
