//! # env-detect
//!
//! Environment classification for the chaos-gate safety engine.  This crate
//! answers one question before any experiment is allowed to run: *where am I?*
//!
//! The crate is organised around four layers:
//!
//! 1. **[`rules`]** -- the [`DetectionRule`] records loaded from the safety
//!    config, and the [`EnvironmentType`] they resolve to.
//! 2. **[`matcher`]** -- one pure matching function per rule source
//!    (env var, hostname glob, cloud tag, cloud provider).
//! 3. **[`detector`]** -- evaluates the priority-sorted rule list against a
//!    [`DetectionContext`] snapshot and produces a [`DetectionResult`].
//! 4. **[`probe`]** -- the cloud-metadata probing port.  Probes for every
//!    configured provider are raced concurrently with a short overall
//!    timeout; the first success wins and the rest are abandoned.
//!
//! Detection itself never blocks: all cloud evidence must be resolved (via
//! [`probe::probe_any`]) before [`detector::EnvironmentDetector::detect`] is
//! called.

pub mod context;
pub mod detector;
pub mod matcher;
pub mod probe;
pub mod rules;

// Re-export primary public API at crate root.
pub use context::{CloudInfo, DetectionContext};
pub use detector::EnvironmentDetector;
pub use probe::{build_probes, probe_any, CloudProbe, ProbeConfig};
pub use rules::{DetectionResult, DetectionRule, EnvironmentType, MatchedRule, RuleSource};
