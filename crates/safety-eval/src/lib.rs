//! # safety-eval
//!
//! The policy engine of chaos-gate: given an experiment request and a
//! resolved environment, produce an [`EvaluationReport`] with an exhaustive,
//! ordered list of [`Violation`]s (empty = allowed).
//!
//! Every check runs on every evaluation -- there is no short-circuit on the
//! first failure, because a single report must carry every actionable
//! problem.  Blocking violation kinds decide [`EvaluationReport::allowed`];
//! confirmation/approval kinds are advisory gates the calling flow handles.
//!
//! Protected services come from two places: the environment policy's static
//! set, and pluggable [`DiscoveryBackend`]s (Kubernetes, Consul).  A backend
//! that errors or times out contributes no protections and never aborts the
//! check -- availability of the gate must not depend on discovery uptime,
//! while static protections stay authoritative.

pub mod consul;
pub mod discovery;
pub mod evaluator;
pub mod kubernetes;
pub mod request;
pub mod violation;

// Re-export primary public API at crate root.
pub use consul::ConsulBackend;
pub use discovery::{DiscoveryBackend, ProtectedLookup, ProtectedServiceResolver};
pub use evaluator::{EvalOptions, SafetyEvaluator};
pub use kubernetes::KubernetesBackend;
pub use request::{ExperimentRequest, ExperimentTarget};
pub use violation::{EvaluationReport, Violation, ViolationKind};
