//! # safety-policy
//!
//! Loads and validates the chaos-gate safety configuration (YAML) and holds
//! the resulting per-environment policies as an immutable [`PolicyStore`].
//!
//! Validation reports *every* schema problem at once as a structured list of
//! [`SchemaViolation`] records, so a caller can display all of them instead
//! of fixing one at a time.  A config that fails validation is never turned
//! into a store.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use safety_policy::{loader, PolicyStore};
//!
//! let config = loader::load("safety.yaml").unwrap();
//! let store = PolicyStore::from_config(&config).unwrap();
//! let policy = store.policy_for(env_detect::EnvironmentType::Production);
//! assert!(!policy.enabled);
//! ```

pub mod loader;
pub mod schema;
pub mod store;

// Re-export primary public API at crate root.
pub use loader::SchemaViolation;
pub use schema::{
    ConsulDiscovery, DetectionSection, DiscoverySection, KubernetesDiscovery, RawExperimentRule,
    RawPolicy, SafetyConfig,
};
pub use store::{ExperimentRule, PolicyStore, SafetyPolicy};
