//! StateStore — redb-backed persistence for rules and audit events.
//!
//! Rules are plain CRUD. Events are append-ish records with a lifecycle:
//! `begin_event` atomically checks-and-sets the run lock, `append_event_log`
//! grows the record's log, and `finish_event` seals the record and releases
//! the lock. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use gridpool_backend::events::{Event, EventError, EventLog};
use gridpool_backend::rules::{RuleError, RuleStore};
use gridpool_core::Rule;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RULES).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.open_table(RUNNING).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Rules ──────────────────────────────────────────────────────

    /// Insert or update a rule, keyed by its pool filter.
    pub fn put_rule(&self, rule: &Rule) -> StateResult<()> {
        let value = serde_json::to_vec(rule).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RULES).map_err(map_err!(Table))?;
            table
                .insert(rule.pool.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %rule.pool, "rule stored");
        Ok(())
    }

    /// Get the rule for an exact pool filter (`""` = default rule).
    pub fn get_rule(&self, pool: &str) -> StateResult<Option<Rule>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RULES).map_err(map_err!(Table))?;
        match table.get(pool).map_err(map_err!(Read))? {
            Some(guard) => {
                let rule: Rule =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    /// List all rules.
    pub fn list_rules(&self) -> StateResult<Vec<Rule>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RULES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let rule: Rule =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(rule);
        }
        Ok(results)
    }

    /// Delete a rule by pool filter. Returns true if it existed.
    pub fn delete_rule(&self, pool: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RULES).map_err(map_err!(Table))?;
            existed = table.remove(pool).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Start a new event for (pool, kind), acquiring the run lock.
    ///
    /// Lock check, id allocation, and record creation happen in a single
    /// write transaction, so two concurrent passes can never both begin.
    pub fn begin_event(&self, pool: &str, kind: &str) -> StateResult<EventRecord> {
        let lock_key = running_key(pool, kind);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut running = txn.open_table(RUNNING).map_err(map_err!(Table))?;
            if running
                .get(lock_key.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::EventRunning(pool.to_string()));
            }
            let mut events = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            let next_id = events
                .last()
                .map_err(map_err!(Read))?
                .map(|(key, _)| key.value() + 1)
                .unwrap_or(1);
            record = EventRecord {
                id: next_id,
                pool: pool.to_string(),
                kind: kind.to_string(),
                status: EventStatus::Running,
                logs: Vec::new(),
                error: None,
                outcome: None,
                started_at: epoch_secs(),
                finished_at: None,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            events
                .insert(next_id, value.as_slice())
                .map_err(map_err!(Write))?;
            running
                .insert(lock_key.as_str(), next_id)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool, kind, id = record.id, "event started");
        Ok(record)
    }

    /// Append a log line to a running event.
    pub fn append_event_log(&self, id: u64, line: &str) -> StateResult<()> {
        self.update_event(id, |record| {
            record.logs.push(line.to_string());
        })
    }

    /// Seal an event record and release its run lock.
    pub fn finish_event(
        &self,
        id: u64,
        status: EventStatus,
        error: Option<String>,
        outcome: Option<serde_json::Value>,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut events = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            let mut record: EventRecord = match events.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("event {id}"))),
            };
            record.status = status;
            record.error = error;
            record.outcome = outcome;
            record.finished_at = Some(epoch_secs());
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            events.insert(id, value.as_slice()).map_err(map_err!(Write))?;

            let mut running = txn.open_table(RUNNING).map_err(map_err!(Table))?;
            running
                .remove(running_key(&record.pool, &record.kind).as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, ?status, "event finished");
        Ok(())
    }

    /// Get an event by id.
    pub fn get_event(&self, id: u64) -> StateResult<Option<EventRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: EventRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all events for a pool, oldest first.
    pub fn list_events(&self, pool: &str) -> StateResult<Vec<EventRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: EventRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.pool == pool {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Read-modify-write a single event record.
    fn update_event(&self, id: u64, apply: impl FnOnce(&mut EventRecord)) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut events = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            let mut record: EventRecord = match events.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("event {id}"))),
            };
            apply(&mut record);
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            events.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn running_key(pool: &str, kind: &str) -> String {
    format!("{kind}:{pool}")
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Contract implementations ───────────────────────────────────────

impl RuleStore for StateStore {
    fn rule_for_pool(&self, pool: &str) -> Result<Option<Rule>, RuleError> {
        self.get_rule(pool).map_err(|e| RuleError::Backend(e.to_string()))
    }
}

/// A live audit record handed out by [`EventLog::begin`].
struct StoreEvent {
    store: StateStore,
    id: u64,
}

impl Event for StoreEvent {
    fn log(&self, line: &str) {
        debug!(event = self.id, "{line}");
        if let Err(e) = self.store.append_event_log(self.id, line) {
            warn!(event = self.id, error = %e, "failed to append event log");
        }
    }

    fn done(
        &self,
        error: Option<String>,
        outcome: Option<serde_json::Value>,
    ) -> Result<(), EventError> {
        let status = if error.is_some() {
            EventStatus::Failed
        } else {
            EventStatus::Done
        };
        self.store
            .finish_event(self.id, status, error, outcome)
            .map_err(|e| EventError::Backend(e.to_string()))
    }

    fn abort(&self) -> Result<(), EventError> {
        self.store
            .finish_event(self.id, EventStatus::Aborted, None, None)
            .map_err(|e| EventError::Backend(e.to_string()))
    }
}

impl EventLog for StateStore {
    fn begin(&self, pool: &str, kind: &str) -> Result<Arc<dyn Event>, EventError> {
        match self.begin_event(pool, kind) {
            Ok(record) => Ok(Arc::new(StoreEvent {
                store: self.clone(),
                id: record.id,
            })),
            Err(StateError::EventRunning(pool)) => Err(EventError::Locked(pool)),
            Err(e) => Err(EventError::Backend(e.to_string())),
        }
    }
}
