//! Audit/event subsystem contract.
//!
//! Besides recording outcomes, the event log doubles as the per-pool run
//! lock: at most one live event may exist for a given (pool, kind) at any
//! time, and a second [`EventLog::begin`] fails with [`EventError::Locked`]
//! until the first is completed or aborted.

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the audit subsystem.
#[derive(Debug, Error)]
pub enum EventError {
    /// A live event already exists for this (pool, kind); the caller
    /// should skip silently rather than treat this as a failure.
    #[error("autoscale already running for pool {0}")]
    Locked(String),

    #[error("event backend error: {0}")]
    Backend(String),
}

/// One live audit record, held for the duration of a pool pass.
///
/// Completing the record (via [`done`](Event::done) or
/// [`abort`](Event::abort)) releases the run lock.
pub trait Event: Send + Sync {
    /// Append a human-readable line to the event's log.
    fn log(&self, line: &str);

    /// Complete the record: `error` marks it failed, `outcome` attaches
    /// structured decision data.
    fn done(
        &self,
        error: Option<String>,
        outcome: Option<serde_json::Value>,
    ) -> Result<(), EventError>;

    /// Complete the record as a no-op/aborted pass.
    fn abort(&self) -> Result<(), EventError>;
}

/// Factory for audit records.
pub trait EventLog: Send + Sync {
    /// Start a new event scoped to (pool, kind), acquiring the run lock.
    fn begin(&self, pool: &str, kind: &str) -> Result<Arc<dyn Event>, EventError>;
}
