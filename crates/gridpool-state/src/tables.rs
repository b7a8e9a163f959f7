//! redb table definitions for the gridpool state store.
//!
//! Values are JSON-serialized domain types in `&[u8]` columns.

use redb::TableDefinition;

/// Scaling rules keyed by pool filter (`""` is the default rule).
pub const RULES: TableDefinition<&str, &[u8]> = TableDefinition::new("rules");

/// Audit event records keyed by a monotonically increasing id.
pub const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");

/// Live (uncompleted) events keyed by `{kind}:{pool}`, value = event id.
/// Presence of a key is the per-pool run lock.
pub const RUNNING: TableDefinition<&str, u64> = TableDefinition::new("running");
