//! Workload census — a consistent per-node unit report.
//!
//! Scaling decisions need unit placement that is not shifting underneath
//! them, so the census takes every app lock in the pool before refreshing
//! node state. Any denied lock aborts the census immediately with
//! [`AutoscaleError::AppNotLocked`]; a partial report is never returned.

use std::collections::HashMap;

use tracing::debug;

use gridpool_backend::{AppRegistry, NodeProvisioner};
use gridpool_core::{Node, Unit};

use crate::config::LOCK_OWNER;
use crate::error::{AutoscaleError, AutoscaleResult};

/// Releases every acquired app lock when dropped, so early returns and
/// errors can't leak locks.
struct AppLockGuard<'a> {
    apps: &'a dyn AppRegistry,
    held: Vec<String>,
}

impl Drop for AppLockGuard<'_> {
    fn drop(&mut self) {
        for app in &self.held {
            self.apps.release_app_lock(app);
        }
    }
}

/// Refresh each node's unit placement under the pool's app locks.
///
/// Returns address → units for every node in `nodes`.
pub async fn units_per_node(
    prov: &dyn NodeProvisioner,
    apps: &dyn AppRegistry,
    pool: &str,
    nodes: &[Node],
) -> AutoscaleResult<HashMap<String, Vec<Unit>>> {
    let pool_apps = apps.list_apps(pool).await?;
    let mut guard = AppLockGuard {
        apps,
        held: Vec::new(),
    };
    for app in &pool_apps {
        if !apps.acquire_app_lock(&app.name, LOCK_OWNER, "node auto scale")? {
            return Err(AutoscaleError::AppNotLocked(app.name.clone()));
        }
        guard.held.push(app.name.clone());
    }
    debug!(pool, apps = guard.held.len(), "app locks acquired for census");

    let mut report = HashMap::new();
    for node in nodes {
        let fresh = prov.get_node(&node.address).await?;
        report.insert(node.address.clone(), fresh.units);
    }
    Ok(report)
}

/// Total unit count and the max−min spread across nodes. An empty report
/// is (0, 0).
pub fn units_gap(report: &HashMap<String, Vec<Unit>>) -> (u32, u32) {
    if report.is_empty() {
        return (0, 0);
    }
    let counts: Vec<u32> = report.values().map(|units| units.len() as u32).collect();
    let total = counts.iter().sum();
    let max = counts.iter().copied().max().unwrap_or(0);
    let min = counts.iter().copied().min().unwrap_or(0);
    (total, max - min)
}
