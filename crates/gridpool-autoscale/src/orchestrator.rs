//! Pool scan and per-pool pass orchestration.
//!
//! A pass walks every registered provisioner, groups nodes by pool, and
//! runs each pool through the same sequence: take the run lock, resolve
//! the rule, run the scaler, act on the decision, maybe rebalance, then
//! seal the audit record. Per-pool outcomes never abort the scan; only a
//! failed provisioner enumeration is fatal to the whole pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info};

use gridpool_backend::{Event, EventError, NodeProvisioner, RebalanceOptions, RuleStore};
use gridpool_core::{Node, NodeSpec, POOL_METADATA, Rule, ScalerResult};

use crate::config::{EVENT_KIND, LogSink, PassContext};
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::executor::{add_nodes, remove_nodes};
use crate::scaler::scaler_for_rule;

/// Run one full pass over every pool of every provisioner.
pub async fn run_pass(ctx: &PassContext) -> AutoscaleResult<()> {
    let provisioners = ctx.backends.registry.provisioners()?;

    // BTreeMap gives a deterministic pool order.
    let mut pools: BTreeMap<String, (Arc<dyn NodeProvisioner>, Vec<Node>)> = BTreeMap::new();
    for prov in provisioners {
        let nodes = match prov.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(provisioner = prov.name(), error = %e, "listing nodes");
                continue;
            }
        };
        for node in nodes {
            if node.pool.is_empty() {
                debug!(address = %node.address, "node has no pool, skipping");
                continue;
            }
            pools
                .entry(node.pool.clone())
                .or_insert_with(|| (Arc::clone(&prov), Vec::new()))
                .1
                .push(node);
        }
    }

    for (pool, (prov, nodes)) in &pools {
        run_pool_pass(ctx, prov, pool, nodes).await;
    }
    Ok(())
}

/// How one pool pass ended, before the audit record is sealed.
enum PassOutcome {
    /// Clean no-op with a reason; the event is aborted.
    Skip(String),
    /// The scaler ran; the event is completed with a structured outcome.
    Evaluated {
        result: ScalerResult,
        rule: Rule,
        changed: Vec<NodeSpec>,
    },
}

async fn run_pool_pass(
    ctx: &PassContext,
    prov: &Arc<dyn NodeProvisioner>,
    pool: &str,
    nodes: &[Node],
) {
    let event = match ctx.backends.events.begin(pool, EVENT_KIND) {
        Ok(event) => event,
        Err(EventError::Locked(_)) => {
            debug!(pool, "autoscale already running, skipping");
            return;
        }
        Err(e) => {
            error!(pool, error = %e, "starting autoscale event");
            return;
        }
    };
    let event: Arc<dyn Event> = match &ctx.sink {
        Some(sink) => Arc::new(TeeEvent {
            inner: event,
            sink: Arc::clone(sink),
        }),
        None => event,
    };

    match evaluate_pool(ctx, prov, pool, nodes, &event).await {
        Ok(PassOutcome::Skip(reason)) => {
            debug!(pool, %reason, "autoscale pass skipped");
            event.log(&reason);
            if let Err(e) = event.abort() {
                error!(pool, error = %e, "aborting autoscale event");
            }
        }
        Ok(PassOutcome::Evaluated {
            result,
            rule,
            changed,
        }) => {
            let completion = if result.no_action() {
                event.log("nothing to do");
                event.abort()
            } else {
                info!(
                    pool,
                    to_add = result.to_add,
                    to_remove = result.to_remove.len(),
                    rebalanced = result.to_rebalance,
                    "autoscale pass completed"
                );
                let outcome = json!({
                    "result": result,
                    "nodes": changed,
                    "rule": rule,
                });
                event.done(None, Some(outcome))
            };
            if let Err(e) = completion {
                error!(pool, error = %e, "completing autoscale event");
            }
        }
        Err(e) => {
            error!(pool, error = %e, "autoscale pass failed");
            event.log(&format!("autoscale pass failed: {e}"));
            if let Err(done_err) = event.done(Some(e.to_string()), None) {
                error!(pool, error = %done_err, "recording autoscale failure");
            }
        }
    }
}

async fn evaluate_pool(
    ctx: &PassContext,
    prov: &Arc<dyn NodeProvisioner>,
    pool: &str,
    nodes: &[Node],
    event: &Arc<dyn Event>,
) -> AutoscaleResult<PassOutcome> {
    let rule = match resolve_rule(ctx.backends.rules.as_ref(), pool)? {
        Some(rule) => rule,
        None => {
            return Ok(PassOutcome::Skip(format!(
                "no auto scale rule for pool {pool}"
            )));
        }
    };
    if !rule.enabled {
        return Ok(PassOutcome::Skip(format!(
            "auto scale rule disabled for pool {pool}"
        )));
    }

    let scaler = scaler_for_rule(
        &rule,
        &ctx.config,
        Arc::clone(prov),
        Arc::clone(&ctx.backends.apps),
    );
    let mut result = match scaler.scale(pool, nodes).await {
        Ok(result) => result,
        Err(AutoscaleError::AppNotLocked(app)) => {
            return Ok(PassOutcome::Skip(format!(
                "app {app} is locked, will retry later"
            )));
        }
        Err(e) => return Err(e),
    };
    event.log(&format!("scaler {} decided: {}", scaler.name(), result.reason));

    let mut changed = Vec::new();
    if result.to_add > 0 {
        event.log(&format!("adding {} nodes to pool {pool}", result.to_add));
        let (added, add_err) = add_nodes(
            event,
            prov,
            &ctx.backends.iaas,
            nodes,
            result.to_add,
            ctx.config.wait_new_node,
        )
        .await;
        if let Some(e) = add_err {
            if added.is_empty() {
                return Err(e);
            }
            event.log(&format!("not all nodes were created: {e}"));
        }
        changed = added;
    } else if !result.to_remove.is_empty() {
        event.log(&format!(
            "removing {} nodes from pool {pool}",
            result.to_remove.len()
        ));
        remove_nodes(event, prov, &ctx.backends.iaas, &result.to_remove).await?;
        changed = result.to_remove.clone();
    }

    rebalance_if_needed(prov, pool, &rule, &mut result, event).await?;
    Ok(PassOutcome::Evaluated {
        result,
        rule,
        changed,
    })
}

/// Exact pool rule first, then the default (`""`) rule.
fn resolve_rule(rules: &dyn RuleStore, pool: &str) -> AutoscaleResult<Option<Rule>> {
    if let Some(rule) = rules.rule_for_pool(pool)? {
        return Ok(Some(rule));
    }
    Ok(rules.rule_for_pool("")?)
}

/// Let the provisioner redistribute workloads after the pass changed (or
/// considered changing) the node set. Removals already rebalance the
/// departing node's units, so the pass skips this step entirely then.
async fn rebalance_if_needed(
    prov: &Arc<dyn NodeProvisioner>,
    pool: &str,
    rule: &Rule,
    result: &mut ScalerResult,
    event: &Arc<dyn Event>,
) -> AutoscaleResult<()> {
    if rule.prevent_rebalance || !result.to_remove.is_empty() {
        result.to_rebalance = false;
        return Ok(());
    }
    let Some(rebalancer) = prov.rebalancer() else {
        result.to_rebalance = false;
        return Ok(());
    };

    let mut filter = std::collections::HashMap::new();
    filter.insert(POOL_METADATA.to_string(), pool.to_string());
    match rebalancer
        .rebalance_nodes(RebalanceOptions {
            force: false,
            metadata_filter: filter,
        })
        .await
    {
        Ok(rebalanced) => {
            if rebalanced {
                event.log(&format!("workloads rebalanced across pool {pool}"));
            }
            result.to_rebalance = rebalanced;
            Ok(())
        }
        Err(e) => {
            // A failed rebalance only fails the pass when it was the
            // pass's sole purpose.
            if result.is_rebalance_only() {
                return Err(e.into());
            }
            error!(pool, error = %e, "rebalancing pool");
            event.log(&format!("unable to rebalance pool {pool}: {e}"));
            Ok(())
        }
    }
}

/// Wraps an audit event, teeing every log line to a sink.
struct TeeEvent {
    inner: Arc<dyn Event>,
    sink: LogSink,
}

impl Event for TeeEvent {
    fn log(&self, line: &str) {
        (self.sink)(line);
        self.inner.log(line);
    }

    fn done(
        &self,
        error: Option<String>,
        outcome: Option<serde_json::Value>,
    ) -> Result<(), EventError> {
        self.inner.done(error, outcome)
    }

    fn abort(&self) -> Result<(), EventError> {
        self.inner.abort()
    }
}
