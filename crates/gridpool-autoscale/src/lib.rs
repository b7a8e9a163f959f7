//! gridpool-autoscale — the pool autoscaling control loop.
//!
//! On a fixed schedule (or on demand), the controller scans every
//! registered provisioner, groups nodes by pool, and runs each pool
//! through a guarded pass:
//!
//! ```text
//! begin audit event (doubles as the per-pool run lock)
//!   resolve rule (exact pool, then the "" default)
//!   run the rule's scaler under the pool's app locks
//!   to_add > 0      → create machines + register nodes concurrently
//!   to_remove != [] → unregister nodes + tear down machines concurrently
//!   otherwise       → let the provisioner rebalance workloads
//! seal the event: done (action taken / failure) or abort (clean no-op)
//! ```
//!
//! Contention — a live event for the pool, or a held app lock — defers
//! the pass to the next tick instead of failing it. Panics in a pass are
//! caught at a fault barrier and surface as `AutoscaleError::Internal`.

pub mod census;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod scaler;

pub use config::{AutoscaleConfig, Backends, LogSink, PassContext};
pub use controller::Controller;
pub use error::{AggregateError, AutoscaleError, AutoscaleResult};
pub use orchestrator::run_pass;
pub use scaler::{CountScaler, MemoryScaler, Scaler, scaler_for_rule};
