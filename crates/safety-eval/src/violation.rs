use serde::{Deserialize, Serialize};

use env_detect::{DetectionResult, EnvironmentType};

/// Machine-readable category of one safety violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Experiments are disabled outright in the resolved environment.
    EnvironmentDisabled,
    /// The experiment type is not on the environment's allow list.
    TypeNotAllowed,
    /// Requested duration exceeds the environment's cap.
    DurationExceeded,
    /// The target service is protected, statically or via discovery.
    ProtectedService,
    /// A type-specific parameter bound was violated.
    ParameterOutOfRange,
    /// Interactive confirmation is required and was not supplied (advisory).
    ConfirmationRequired,
    /// An approval token is required and was not supplied (advisory).
    ApprovalRequired,
}

impl ViolationKind {
    /// Blocking kinds make the report's `allowed` false; confirmation and
    /// approval are advisory gates resolved by the calling flow.
    pub fn is_blocking(&self) -> bool {
        !matches!(
            self,
            ViolationKind::ConfirmationRequired | ViolationKind::ApprovalRequired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::EnvironmentDisabled => "environment_disabled",
            ViolationKind::TypeNotAllowed => "type_not_allowed",
            ViolationKind::DurationExceeded => "duration_exceeded",
            ViolationKind::ProtectedService => "protected_service",
            ViolationKind::ParameterOutOfRange => "parameter_out_of_range",
            ViolationKind::ConfirmationRequired => "confirmation_required",
            ViolationKind::ApprovalRequired => "approval_required",
        }
    }
}

/// One reason an experiment request fails or requires extra gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Human-readable explanation.
    pub message: String,
    /// Machine-readable context, e.g. `{"requested": 7200, "max": 1800}`.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Violation {
    pub fn new(
        kind: ViolationKind,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            details,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.kind.is_blocking()
    }
}

/// The complete, deterministic output of checking one experiment request.
///
/// The report is the sole output of the evaluation core and is handed
/// verbatim to the audit trail; it owns no resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// True iff no *blocking* violation is present.
    pub allowed: bool,
    /// The environment the policy was applied to.
    pub environment: EnvironmentType,
    /// Full detection diagnostics for the audit trail.
    pub detection: DetectionResult,
    /// Every violation found, in evaluation order.
    pub violations: Vec<Violation>,
    /// Discovery backends that errored or timed out during this evaluation;
    /// their protections could not be consulted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_backends: Vec<String>,
}

impl EvaluationReport {
    /// Violations that make the request outright denied.
    pub fn blocking_violations(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.is_blocking())
    }

    /// Advisory gates (confirmation/approval) left unsatisfied.
    pub fn advisory_violations(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| !v.is_blocking())
    }
}
