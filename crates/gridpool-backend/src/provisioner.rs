//! Cluster provisioner contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use gridpool_core::{Metadata, Node};

/// Errors surfaced by provisioner backends.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("provisioner backend error: {0}")]
    Backend(String),
}

/// Options for registering a newly created machine as a node.
#[derive(Debug, Clone)]
pub struct AddNodeOptions {
    pub address: String,
    pub metadata: Metadata,
    /// How long to block waiting for the node to become ready.
    pub wait_timeout: Duration,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

/// Options for unregistering a node.
#[derive(Debug, Clone)]
pub struct RemoveNodeOptions {
    pub address: String,
    /// Redistribute the node's workloads to its siblings as part of
    /// unregistration.
    pub rebalance: bool,
}

/// Options for a pool-scoped rebalance pass.
#[derive(Debug, Clone, Default)]
pub struct RebalanceOptions {
    /// Rebalance even when the provisioner considers the spread acceptable.
    pub force: bool,
    /// Restrict the pass to nodes matching this metadata.
    pub metadata_filter: HashMap<String, String>,
}

/// A cluster backend that owns nodes and workload placement.
#[async_trait]
pub trait NodeProvisioner: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &str;

    /// List all nodes this provisioner knows about.
    async fn list_nodes(&self) -> Result<Vec<Node>, ProvisionError>;

    /// Register a new node address, blocking up to `wait_timeout` for it
    /// to become ready.
    async fn add_node(&self, opts: AddNodeOptions) -> Result<(), ProvisionError>;

    /// Fetch a live node snapshot by address.
    async fn get_node(&self, address: &str) -> Result<Node, ProvisionError>;

    /// Unregister a node, optionally redistributing its workloads first.
    async fn remove_node(&self, opts: RemoveNodeOptions) -> Result<(), ProvisionError>;

    /// Optional capability: workload rebalancing across nodes.
    fn rebalancer(&self) -> Option<&dyn NodeRebalancer> {
        None
    }
}

/// Optional provisioner capability to redistribute workloads.
#[async_trait]
pub trait NodeRebalancer: Send + Sync {
    /// Run a rebalance pass. Returns whether anything was actually moved.
    async fn rebalance_nodes(&self, opts: RebalanceOptions) -> Result<bool, ProvisionError>;
}

/// Enumerates the registered provisioners for a pass.
pub trait ProvisionerRegistry: Send + Sync {
    fn provisioners(&self) -> Result<Vec<Arc<dyn NodeProvisioner>>, ProvisionError>;
}

/// A registry over a fixed provisioner list.
pub struct StaticRegistry {
    provisioners: Vec<Arc<dyn NodeProvisioner>>,
}

impl StaticRegistry {
    pub fn new(provisioners: Vec<Arc<dyn NodeProvisioner>>) -> Self {
        Self { provisioners }
    }
}

impl ProvisionerRegistry for StaticRegistry {
    fn provisioners(&self) -> Result<Vec<Arc<dyn NodeProvisioner>>, ProvisionError> {
        Ok(self.provisioners.clone())
    }
}
