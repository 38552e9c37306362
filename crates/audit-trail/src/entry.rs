use serde::{Deserialize, Serialize};

/// A single audit trail entry representing an event in the gate's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationRecord>,
}

impl AuditEntry {
    /// Create a new `AuditEntry` with an auto-generated UUID v4 and the current
    /// UTC timestamp. The caller supplies the event type, source, and
    /// free-form details JSON value. `evaluation` defaults to `None`.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
            evaluation: None,
        }
    }

    /// Attach an evaluation record to this entry, consuming and returning
    /// `self` for builder-style usage.
    pub fn with_evaluation(mut self, record: EvaluationRecord) -> Self {
        self.evaluation = Some(record);
        self
    }
}

/// The category of audit event being recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    GateStarted,
    GateStopped,
    ConfigLoaded,
    EnvironmentDetected,
    ExperimentEvaluated,
    ExperimentAllowed,
    ExperimentBlocked,
    ConfirmationPending,
}

/// Identifies the component and optional contextual metadata for the event
/// source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,
}

impl AuditSource {
    /// Convenience constructor that only requires the component name. All
    /// optional fields default to `None`.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            hostname: None,
            experiment: None,
        }
    }

    pub fn with_experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = Some(experiment.into());
        self
    }
}

/// Condensed outcome of one safety evaluation attached to an audit event.
///
/// Deliberately flat: the full report goes into `details`, this record exists
/// so log processors can filter on outcome without parsing the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub allowed: bool,
    pub environment: String,
    pub violation_kinds: Vec<String>,
}
