//! In-memory backend implementations.
//!
//! Used by the test suites and by `gridpoold`'s standalone mode. Failures
//! can be scripted per call site (failed listings, failed adds, per-node
//! remove failures, denied app locks) so partial-failure paths are easy to
//! exercise.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tracing::debug;

use gridpool_core::{Metadata, Node, POOL_METADATA, url_to_host};

use crate::apps::{AppError, AppInfo, AppRegistry};
use crate::iaas::{Iaas, IaasError, MachineInfo};
use crate::provisioner::{
    AddNodeOptions, NodeProvisioner, NodeRebalancer, ProvisionError, RebalanceOptions,
    RemoveNodeOptions,
};

// ── Provisioner ────────────────────────────────────────────────────

#[derive(Default)]
struct ProvisionerState {
    nodes: Vec<Node>,
    fail_list: bool,
    fail_next_adds: u32,
    fail_removals: HashSet<String>,
    removed: Vec<String>,
    rebalance_calls: u32,
}

/// In-memory [`NodeProvisioner`] holding a node set behind a mutex.
pub struct InMemoryProvisioner {
    name: String,
    state: Mutex<ProvisionerState>,
    /// Whether this provisioner advertises the rebalance capability.
    rebalance_supported: bool,
    /// Scripted answer for rebalance passes: (did_rebalance, fail).
    rebalance_result: Mutex<(bool, bool)>,
}

impl InMemoryProvisioner {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ProvisionerState::default()),
            rebalance_supported: false,
            rebalance_result: Mutex::new((false, false)),
        }
    }

    /// Enable the rebalance capability, answering `did_rebalance`.
    pub fn with_rebalancer(mut self, did_rebalance: bool) -> Self {
        self.rebalance_supported = true;
        *self.rebalance_result.get_mut().unwrap() = (did_rebalance, false);
        self
    }

    /// Seed a node.
    pub fn push_node(&self, node: Node) {
        self.state.lock().unwrap().nodes.push(node);
    }

    /// Script the next `list_nodes` calls to fail.
    pub fn fail_listings(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    /// Script the next `count` `add_node` calls to fail.
    pub fn fail_next_adds(&self, count: u32) {
        self.state.lock().unwrap().fail_next_adds = count;
    }

    /// Script `remove_node` for this address to fail.
    pub fn fail_removal_of(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_removals
            .insert(address.to_string());
    }

    /// Script rebalance passes to fail.
    pub fn fail_rebalance(&self) {
        self.rebalance_result.lock().unwrap().1 = true;
    }

    /// Addresses removed so far, in completion order.
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    /// How many rebalance passes ran.
    pub fn rebalance_calls(&self) -> u32 {
        self.state.lock().unwrap().rebalance_calls
    }

    /// Current node count.
    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }
}

#[async_trait]
impl NodeProvisioner for InMemoryProvisioner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ProvisionError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(ProvisionError::Backend("scripted listing failure".into()));
        }
        Ok(state.nodes.clone())
    }

    async fn add_node(&self, opts: AddNodeOptions) -> Result<(), ProvisionError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_adds > 0 {
            state.fail_next_adds -= 1;
            return Err(ProvisionError::Backend(format!(
                "scripted add failure for {}",
                opts.address
            )));
        }
        let pool = opts
            .metadata
            .get(POOL_METADATA)
            .cloned()
            .unwrap_or_default();
        state.nodes.push(Node {
            address: opts.address,
            pool,
            metadata: opts.metadata,
            units: Vec::new(),
        });
        Ok(())
    }

    async fn get_node(&self, address: &str) -> Result<Node, ProvisionError> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .find(|n| n.address == address)
            .cloned()
            .ok_or_else(|| ProvisionError::NodeNotFound(address.to_string()))
    }

    async fn remove_node(&self, opts: RemoveNodeOptions) -> Result<(), ProvisionError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_removals.contains(&opts.address) {
            return Err(ProvisionError::Backend(format!(
                "scripted removal failure for {}",
                opts.address
            )));
        }
        let before = state.nodes.len();
        state.nodes.retain(|n| n.address != opts.address);
        if state.nodes.len() == before {
            return Err(ProvisionError::NodeNotFound(opts.address));
        }
        debug!(address = %opts.address, rebalance = opts.rebalance, "node unregistered");
        state.removed.push(opts.address);
        Ok(())
    }

    fn rebalancer(&self) -> Option<&dyn NodeRebalancer> {
        self.rebalance_supported.then_some(self as &dyn NodeRebalancer)
    }
}

#[async_trait]
impl NodeRebalancer for InMemoryProvisioner {
    async fn rebalance_nodes(&self, _opts: RebalanceOptions) -> Result<bool, ProvisionError> {
        self.state.lock().unwrap().rebalance_calls += 1;
        let (did_rebalance, fail) = *self.rebalance_result.lock().unwrap();
        if fail {
            return Err(ProvisionError::Backend("scripted rebalance failure".into()));
        }
        Ok(did_rebalance)
    }
}

// ── IaaS ───────────────────────────────────────────────────────────

#[derive(Default)]
struct IaasState {
    machines: HashMap<String, MachineInfo>,
    fail_next_creates: u32,
    fail_destroys: bool,
    destroyed: Vec<String>,
}

/// In-memory [`Iaas`] handing out sequential machine ids and addresses.
#[derive(Default)]
pub struct InMemoryIaas {
    state: Mutex<IaasState>,
    next_id: AtomicU32,
}

impl InMemoryIaas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a machine (so removal passes can find it).
    pub fn register_machine(&self, machine: MachineInfo) {
        self.state
            .lock()
            .unwrap()
            .machines
            .insert(machine.id.clone(), machine);
    }

    /// Script the next `count` `create_machine` calls to fail.
    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().unwrap().fail_next_creates = count;
    }

    /// Script all `destroy_machine` calls to fail.
    pub fn fail_destroys(&self, fail: bool) {
        self.state.lock().unwrap().fail_destroys = fail;
    }

    /// Machine ids destroyed so far.
    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }
}

#[async_trait]
impl Iaas for InMemoryIaas {
    async fn create_machine(
        &self,
        iaas_name: &str,
        _metadata: &Metadata,
    ) -> Result<MachineInfo, IaasError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_next_creates > 0 {
                state.fail_next_creates -= 1;
                return Err(IaasError::Backend(format!(
                    "scripted create failure on {iaas_name}"
                )));
            }
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let machine = MachineInfo {
            id: format!("machine-{n}"),
            address: format!("https://10.0.2.{n}:2376"),
            ca_cert: None,
            client_cert: None,
            client_key: None,
        };
        self.state
            .lock()
            .unwrap()
            .machines
            .insert(machine.id.clone(), machine.clone());
        Ok(machine)
    }

    async fn find_machine(&self, id_or_address: &str) -> Result<MachineInfo, IaasError> {
        let state = self.state.lock().unwrap();
        if let Some(machine) = state.machines.get(id_or_address) {
            return Ok(machine.clone());
        }
        state
            .machines
            .values()
            .find(|m| m.address == id_or_address || url_to_host(&m.address) == id_or_address)
            .cloned()
            .ok_or_else(|| IaasError::MachineNotFound(id_or_address.to_string()))
    }

    async fn destroy_machine(&self, id: &str) -> Result<(), IaasError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_destroys {
            return Err(IaasError::Backend(format!(
                "scripted destroy failure for {id}"
            )));
        }
        if state.machines.remove(id).is_none() {
            return Err(IaasError::MachineNotFound(id.to_string()));
        }
        state.destroyed.push(id.to_string());
        Ok(())
    }
}

// ── Application registry ───────────────────────────────────────────

#[derive(Default)]
struct AppsState {
    apps: Vec<AppInfo>,
    locks: HashMap<String, String>,
    denied: HashSet<String>,
}

/// In-memory [`AppRegistry`] with a lock table.
#[derive(Default)]
pub struct InMemoryApps {
    state: Mutex<AppsState>,
}

impl InMemoryApps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_app(&self, name: &str, pool: &str) {
        self.state.lock().unwrap().apps.push(AppInfo {
            name: name.to_string(),
            pool: pool.to_string(),
        });
    }

    /// Script lock acquisition for this app to be denied.
    pub fn deny_lock(&self, app: &str) {
        self.state.lock().unwrap().denied.insert(app.to_string());
    }

    /// Apps whose lock is currently held.
    pub fn held_locks(&self) -> Vec<String> {
        let mut held: Vec<String> = self.state.lock().unwrap().locks.keys().cloned().collect();
        held.sort();
        held
    }
}

#[async_trait]
impl AppRegistry for InMemoryApps {
    async fn list_apps(&self, pool: &str) -> Result<Vec<AppInfo>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .apps
            .iter()
            .filter(|a| a.pool == pool)
            .cloned()
            .collect())
    }

    fn acquire_app_lock(&self, app: &str, owner: &str, _reason: &str) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.denied.contains(app) || state.locks.contains_key(app) {
            return Ok(false);
        }
        state.locks.insert(app.to_string(), owner.to_string());
        Ok(true)
    }

    fn release_app_lock(&self, app: &str) {
        self.state.lock().unwrap().locks.remove(app);
    }
}
