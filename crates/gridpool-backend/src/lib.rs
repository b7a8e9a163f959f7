//! gridpool-backend — the collaborator contracts the control loop calls.
//!
//! The autoscaler is a pure orchestration layer: everything that touches
//! the outside world sits behind one of these traits.
//!
//! - [`NodeProvisioner`] / [`NodeRebalancer`]: the cluster backend owning
//!   nodes and workload placement.
//! - [`Iaas`]: cloud machine creation and destruction.
//! - [`RuleStore`]: persisted scaling rules.
//! - [`EventLog`] / [`Event`]: the audit subsystem, which also provides
//!   the per-pool run lock.
//! - [`AppRegistry`]: application listing and short-lived app locks.
//!
//! The [`memory`] module carries in-memory implementations with scripted
//! failures, used by the test suites and by `gridpoold`'s standalone mode.

pub mod apps;
pub mod events;
pub mod iaas;
pub mod memory;
pub mod provisioner;
pub mod rules;

pub use apps::{AppError, AppInfo, AppRegistry};
pub use events::{Event, EventError, EventLog};
pub use iaas::{Iaas, IaasError, MachineInfo};
pub use memory::{InMemoryApps, InMemoryIaas, InMemoryProvisioner};
pub use provisioner::{
    AddNodeOptions, NodeProvisioner, ProvisionError, ProvisionerRegistry, RebalanceOptions,
    RemoveNodeOptions, StaticRegistry,
};
pub use rules::{RuleError, RuleStore};
