//! gridpool-state — embedded store for rules and audit events.
//!
//! Backed by [redb](https://docs.rs/redb), this crate persists the two
//! things the autoscaler needs durable: scaling rules (keyed by pool
//! filter) and audit event records. The running-events table doubles as
//! the per-pool run lock: inserting into it inside a single write
//! transaction gives the "at most one live event per pool" invariant.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and implements the `RuleStore` and `EventLog`
//! contracts from `gridpool-backend`.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
