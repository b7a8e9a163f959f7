//! Domain types for the gridpool autoscaler.
//!
//! These are read-only snapshots of backend state plus the decision types
//! the control loop produces. All of them serialize to JSON so they can be
//! attached to audit records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of a resource pool.
pub type PoolName = String;

/// Node metadata: string key → string value.
pub type Metadata = HashMap<String, String>;

/// Metadata key naming the IaaS a node was provisioned on.
pub const IAAS_METADATA: &str = "iaas";

/// Metadata key holding the IaaS-side machine identifier.
pub const IAAS_ID_METADATA: &str = "iaas-id";

/// Metadata key naming the pool a node belongs to.
pub const POOL_METADATA: &str = "pool";

/// Extract the host part of a node address, dropping any scheme and port.
pub fn url_to_host(address: &str) -> &str {
    let rest = address.split_once("://").map_or(address, |(_, r)| r);
    let rest = rest.split_once('/').map_or(rest, |(h, _)| h);
    rest.split_once(':').map_or(rest, |(h, _)| h)
}

// ── Cluster snapshots ──────────────────────────────────────────────

/// One workload unit scheduled on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unit {
    pub id: String,
    /// Name of the application this unit belongs to.
    pub app: String,
    /// Declared memory demand in bytes.
    pub memory_bytes: u64,
}

/// Read-only snapshot of a provisioned compute host.
///
/// Owned by the provisioner backend; the control loop only ever holds
/// snapshots taken at the start of a pass (or refreshed under app locks
/// by the workload census).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Unique address, the node's identity (e.g. `https://10.0.0.1:2376`).
    pub address: String,
    /// Pool this node belongs to. Empty means unassigned — such nodes
    /// are excluded from scaling.
    pub pool: PoolName,
    /// Provisioner-reported metadata, including `iaas` / `iaas-id`.
    pub metadata: Metadata,
    /// Workload units currently scheduled on this node.
    pub units: Vec<Unit>,
}

impl Node {
    /// Snapshot this node's identity and metadata for audit records and
    /// removal batches.
    pub fn to_spec(&self) -> NodeSpec {
        NodeSpec {
            address: self.address.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Immutable snapshot of a node's address and metadata.
///
/// Created at decision time, never mutated; decouples audit records from
/// live backend objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    pub address: String,
    pub metadata: Metadata,
}

// ── Scaling policy ─────────────────────────────────────────────────

/// Which scaler strategy applies to a pool, with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScalingPolicy {
    /// Count-based: compare scheduled unit count against per-node capacity.
    UnitCount {
        max_units_per_node: u32,
        /// Hysteresis for scale-down; must be ≥ 1.0.
        scale_down_ratio: f64,
    },
    /// Memory-based: compare aggregate unit memory demand against node
    /// capacity advertised via the configured total-memory metadata key.
    Memory { max_memory_ratio: f64 },
}

/// Default scale-down hysteresis for the count-based policy.
pub const DEFAULT_SCALE_DOWN_RATIO: f64 = 4.0 / 3.0;

/// A persisted scaling policy, resolved per pool.
///
/// A rule with an empty `pool` is the pool-agnostic default, used when no
/// pool-specific rule exists. Read-only to the control loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    /// Pool this rule applies to; empty string means "default rule".
    pub pool: PoolName,
    pub enabled: bool,
    pub policy: ScalingPolicy,
    /// Suppress the rebalance step after scaling.
    pub prevent_rebalance: bool,
}

impl Rule {
    /// A count-based rule with the default scale-down ratio.
    pub fn unit_count(pool: &str, max_units_per_node: u32) -> Self {
        Self {
            pool: pool.to_string(),
            enabled: true,
            policy: ScalingPolicy::UnitCount {
                max_units_per_node,
                scale_down_ratio: DEFAULT_SCALE_DOWN_RATIO,
            },
            prevent_rebalance: false,
        }
    }

    /// A memory-based rule.
    pub fn memory(pool: &str, max_memory_ratio: f64) -> Self {
        Self {
            pool: pool.to_string(),
            enabled: true,
            policy: ScalingPolicy::Memory { max_memory_ratio },
            prevent_rebalance: false,
        }
    }
}

// ── Scaling decision ───────────────────────────────────────────────

/// The decision output of one scaling pass for one pool.
///
/// `to_add` and `to_remove` are mutually exclusive in how the orchestrator
/// acts on them: a positive `to_add` wins and removal is never attempted
/// in the same pass; removal runs only when `to_add` is zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScalerResult {
    /// Number of nodes to add.
    pub to_add: u32,
    /// Nodes scheduled for removal.
    pub to_remove: Vec<NodeSpec>,
    /// Whether a workload rebalance is requested (updated by the
    /// orchestrator with what the provisioner actually did).
    pub to_rebalance: bool,
    /// Human-readable explanation of the decision.
    pub reason: String,
}

impl ScalerResult {
    /// A decision that changes nothing.
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// True iff this pass adds nothing, removes nothing, and does not
    /// rebalance.
    pub fn no_action(&self) -> bool {
        self.to_add == 0 && self.to_remove.is_empty() && !self.to_rebalance
    }

    /// True iff the only requested action is a rebalance.
    pub fn is_rebalance_only(&self) -> bool {
        self.to_add == 0 && self.to_remove.is_empty() && self.to_rebalance
    }
}
