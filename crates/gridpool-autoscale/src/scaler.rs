//! Scaler strategies — the per-pool decision math.
//!
//! Each strategy turns a pool's node set into a [`ScalerResult`]. Both
//! run the workload census first, so decisions are made against unit
//! placement frozen under app locks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use gridpool_backend::{AppRegistry, NodeProvisioner};
use gridpool_core::{Node, Rule, ScalerResult, ScalingPolicy, choose_nodes_for_removal};

use crate::census::{units_gap, units_per_node};
use crate::config::AutoscaleConfig;
use crate::error::{AutoscaleError, AutoscaleResult};

/// A scaling strategy: looks at a pool's nodes and decides node changes.
#[async_trait]
pub trait Scaler: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// Decide what to do with the pool.
    async fn scale(&self, pool: &str, nodes: &[Node]) -> AutoscaleResult<ScalerResult>;
}

/// Pick the strategy a rule's policy calls for.
pub fn scaler_for_rule(
    rule: &Rule,
    config: &AutoscaleConfig,
    prov: Arc<dyn NodeProvisioner>,
    apps: Arc<dyn AppRegistry>,
) -> Box<dyn Scaler> {
    match rule.policy {
        ScalingPolicy::UnitCount {
            max_units_per_node,
            scale_down_ratio,
        } => Box::new(CountScaler {
            max_units_per_node,
            scale_down_ratio,
            prov,
            apps,
        }),
        ScalingPolicy::Memory { max_memory_ratio } => Box::new(MemoryScaler {
            max_memory_ratio,
            total_memory_metadata: config.total_memory_metadata.clone(),
            prov,
            apps,
        }),
    }
}

/// When nothing else changes, ask for a rebalance iff the per-node unit
/// spread is at least this wide.
const REBALANCE_SPREAD: u32 = 2;

// ── Count-based strategy ───────────────────────────────────────────

/// Compares the scheduled unit count against per-node slot capacity.
pub struct CountScaler {
    max_units_per_node: u32,
    scale_down_ratio: f64,
    prov: Arc<dyn NodeProvisioner>,
    apps: Arc<dyn AppRegistry>,
}

#[async_trait]
impl Scaler for CountScaler {
    fn name(&self) -> &'static str {
        "count"
    }

    async fn scale(&self, pool: &str, nodes: &[Node]) -> AutoscaleResult<ScalerResult> {
        if self.max_units_per_node == 0 {
            return Err(AutoscaleError::Config(
                "max units per node must be greater than zero".to_string(),
            ));
        }
        if self.scale_down_ratio < 1.0 {
            return Err(AutoscaleError::Config(format!(
                "scale down ratio must be at least 1.0, got {}",
                self.scale_down_ratio
            )));
        }

        let report = units_per_node(self.prov.as_ref(), self.apps.as_ref(), pool, nodes).await?;
        let (total, gap) = units_gap(&report);
        let max = i64::from(self.max_units_per_node);
        let free = nodes.len() as i64 * max - i64::from(total);
        debug!(pool, total, free, gap, "count scaler census");

        if free < 0 {
            let to_add = ((-free) + max - 1) / max;
            return Ok(ScalerResult {
                to_add: to_add as u32,
                reason: format!(
                    "{total} units spread across {} nodes exceeds the maximum of {} per node",
                    nodes.len(),
                    self.max_units_per_node
                ),
                ..ScalerResult::default()
            });
        }

        let threshold = (max as f64 * self.scale_down_ratio).floor() as i64;
        if free > threshold {
            let count = (free / threshold) as usize;
            let chosen = choose_nodes_for_removal(nodes, count);
            if !chosen.is_empty() {
                return Ok(ScalerResult {
                    to_remove: chosen.iter().map(Node::to_spec).collect(),
                    reason: format!(
                        "{free} free slots on the pool, more than the scale-down threshold of {threshold}"
                    ),
                    ..ScalerResult::default()
                });
            }
        }

        if gap >= REBALANCE_SPREAD {
            let mut result = ScalerResult::none(format!("unit spread of {gap} across nodes"));
            result.to_rebalance = true;
            return Ok(result);
        }
        Ok(ScalerResult::none("number of units within thresholds"))
    }
}

// ── Memory-based strategy ──────────────────────────────────────────

/// Compares aggregate unit memory demand against node capacity read from
/// a metadata key.
pub struct MemoryScaler {
    max_memory_ratio: f64,
    total_memory_metadata: String,
    prov: Arc<dyn NodeProvisioner>,
    apps: Arc<dyn AppRegistry>,
}

impl MemoryScaler {
    /// A node's usable memory: advertised total scaled by the ratio.
    fn node_capacity(&self, node: &Node) -> AutoscaleResult<u64> {
        let raw = node
            .metadata
            .get(&self.total_memory_metadata)
            .ok_or_else(|| {
                AutoscaleError::Config(format!(
                    "node {} has no {} metadata",
                    node.address, self.total_memory_metadata
                ))
            })?;
        let total: u64 = raw.parse().map_err(|_| {
            AutoscaleError::Config(format!(
                "invalid {} metadata on node {}: {raw}",
                self.total_memory_metadata, node.address
            ))
        })?;
        Ok((total as f64 * self.max_memory_ratio) as u64)
    }
}

#[async_trait]
impl Scaler for MemoryScaler {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn scale(&self, pool: &str, nodes: &[Node]) -> AutoscaleResult<ScalerResult> {
        if self.total_memory_metadata.is_empty() {
            return Err(AutoscaleError::Config(
                "total memory metadata key is not configured".to_string(),
            ));
        }

        let report = units_per_node(self.prov.as_ref(), self.apps.as_ref(), pool, nodes).await?;
        let (_, gap) = units_gap(&report);

        let biggest = report
            .values()
            .flatten()
            .map(|unit| unit.memory_bytes)
            .max()
            .unwrap_or(0);
        if biggest == 0 {
            return Ok(ScalerResult::none("no units on the pool"));
        }

        let empty = Vec::new();
        let mut capacities: HashMap<&str, u64> = HashMap::new();
        let mut frees: HashMap<&str, u64> = HashMap::new();
        for node in nodes {
            let capacity = self.node_capacity(node)?;
            let used: u64 = report
                .get(&node.address)
                .unwrap_or(&empty)
                .iter()
                .map(|unit| unit.memory_bytes)
                .sum();
            capacities.insert(&node.address, capacity);
            frees.insert(&node.address, capacity.saturating_sub(used));
        }
        let total_free: u64 = frees.values().sum();
        debug!(pool, biggest, total_free, gap, "memory scaler census");

        if !frees.values().any(|&free| free >= biggest) {
            return Ok(ScalerResult {
                to_add: 1,
                reason: format!(
                    "no node can fit the biggest unit demand of {biggest} bytes"
                ),
                ..ScalerResult::default()
            });
        }

        // Scale down only when the pool can lose a whole node's capacity
        // and still fit the biggest unit somewhere.
        let chosen = choose_nodes_for_removal(nodes, 1);
        if let Some(victim) = chosen.first() {
            let victim_capacity = capacities.get(victim.address.as_str()).copied().unwrap_or(0);
            if total_free.saturating_sub(victim_capacity) >= biggest {
                return Ok(ScalerResult {
                    to_remove: vec![victim.to_spec()],
                    reason: format!(
                        "pool can spare the capacity of node {}",
                        victim.address
                    ),
                    ..ScalerResult::default()
                });
            }
        }

        if gap >= REBALANCE_SPREAD {
            let mut result = ScalerResult::none(format!("unit spread of {gap} across nodes"));
            result.to_rebalance = true;
            return Ok(result);
        }
        Ok(ScalerResult::none("memory demand within thresholds"))
    }
}
