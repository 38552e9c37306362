//! Append-only structured JSON-lines audit trail for the chaos gate.
//!
//! Every gate decision, configuration load, and environment detection is
//! serialised as a single newline-terminated JSON object and appended to a
//! log file, producing a [JSON Lines](https://jsonlines.org/) stream that is
//! easy to ship, parse, and replay when reconstructing why an experiment was
//! allowed or blocked.  Entries carrying an evaluation record are flushed to
//! disk as soon as they are written; routine lifecycle entries are batched
//! until the writer goes idle.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_trail::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("/var/log/chaos-gate/audit.jsonl").await?;
//!
//! sink.log(AuditEntry::new(
//!     AuditEventType::GateStarted,
//!     AuditSource::new("chaos-gate"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ))
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;

// Re-export primary public types at the crate root for convenience.
pub use entry::{AuditEntry, AuditEventType, AuditSource, EvaluationRecord};
pub use sink::{AuditSink, AuditStartError};
