use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::TemplateType;

/// Starter experiment definitions, one per supported experiment kind. Each
/// targets the test environment so a freshly generated file passes the gate
/// under a typical policy.
const CPU_TEMPLATE: &str = r#"name: "CPU Stress Test"
type: cpu_stress
description: "Simulate high CPU load on test servers"
target:
  environment: test
  service: web-server
  hosts:
    - test-server-01
    - test-server-02
duration: 300
intensity: 80
success_criteria:
  - "Autoscaling group scales up within 2 minutes"
  - "No request timeouts during experiment"
"#;

const MEMORY_TEMPLATE: &str = r#"name: "Memory Pressure Test"
type: memory_exhaust
description: "Simulate memory pressure on test servers"
target:
  environment: test
  service: web-server
  hosts:
    - test-server-01
duration: 180
memory_mb: 1024
success_criteria:
  - "OOM killer does not trigger"
  - "Service remains responsive"
"#;

const NETWORK_TEMPLATE: &str = r#"name: "Network Latency Test"
type: network_latency
description: "Introduce network latency between services"
target:
  environment: test
  service: api-gateway
  hosts:
    - test-api-01
duration: 240
interface: eth0
latency_ms: 100
success_criteria:
  - "Circuit breakers activate appropriately"
  - "Timeout mechanisms function correctly"
"#;

pub fn content(template_type: TemplateType) -> &'static str {
    match template_type {
        TemplateType::Cpu => CPU_TEMPLATE,
        TemplateType::Memory => MEMORY_TEMPLATE,
        TemplateType::Network => NETWORK_TEMPLATE,
    }
}

/// Write the template for `template_type` to `output`.
pub fn write(template_type: TemplateType, output: &Path) -> Result<()> {
    std::fs::write(output, content(template_type))
        .with_context(|| format!("failed to write template to {}", output.display()))?;
    info!(path = %output.display(), "experiment template created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use safety_eval::ExperimentRequest;

    #[test]
    fn every_template_parses_as_an_experiment_request() {
        for (template_type, expected) in [
            (TemplateType::Cpu, "cpu_stress"),
            (TemplateType::Memory, "memory_exhaust"),
            (TemplateType::Network, "network_latency"),
        ] {
            let request = ExperimentRequest::from_str(content(template_type)).unwrap();
            assert_eq!(request.experiment_type, expected);
            assert_eq!(request.target.environment.as_deref(), Some("test"));
            assert!(!request.success_criteria.is_empty());
        }
    }

    #[test]
    fn network_template_carries_its_parameters() {
        let request = ExperimentRequest::from_str(content(TemplateType::Network)).unwrap();
        assert_eq!(request.duration_seconds, 240);
        assert_eq!(request.param_str("interface"), Some("eth0"));
        assert_eq!(request.param_f64("latency_ms"), Some(100.0));
    }

    #[test]
    fn write_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.yaml");
        write(TemplateType::Cpu, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), CPU_TEMPLATE);
    }
}
