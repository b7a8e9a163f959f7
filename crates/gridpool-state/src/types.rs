//! Persisted record types for the gridpool state store.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an audit event record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The pass is in progress and holds the run lock.
    Running,
    /// Completed with an action taken.
    Done,
    /// Completed with a recorded failure.
    Failed,
    /// Completed as a no-op.
    Aborted,
}

/// One audit record: the full story of a single pool pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: u64,
    pub pool: String,
    /// Event kind, e.g. `autoscale`.
    pub kind: String,
    pub status: EventStatus,
    /// Human-readable log lines appended during the pass.
    pub logs: Vec<String>,
    /// Error text when `status` is `Failed`.
    pub error: Option<String>,
    /// Structured outcome data (decision, affected nodes, rule used).
    pub outcome: Option<serde_json::Value>,
    /// Unix timestamp (seconds) when the pass started.
    pub started_at: u64,
    /// Unix timestamp (seconds) when the pass completed.
    pub finished_at: Option<u64>,
}
