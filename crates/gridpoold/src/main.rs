//! gridpoold — the Gridpool daemon.
//!
//! Assembles the autoscaling subsystems around a TOML cluster snapshot:
//! - State store (redb): scaling rules + audit events
//! - In-memory provisioner/IaaS/app backends seeded from the snapshot
//! - Autoscale controller (periodic loop or a single pass)
//!
//! # Usage
//!
//! ```text
//! gridpoold --data-dir /var/lib/gridpool --cluster cluster.toml run
//! gridpoold --data-dir /tmp/gridpool --cluster cluster.toml once
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;

use gridpool_autoscale::{AutoscaleConfig, Backends, Controller, LogSink};
use gridpool_backend::{
    InMemoryApps, InMemoryIaas, InMemoryProvisioner, MachineInfo, NodeProvisioner, StaticRegistry,
};
use gridpool_core::{IAAS_ID_METADATA, Node, POOL_METADATA, Rule, Unit};
use gridpool_state::StateStore;

#[derive(Parser)]
#[command(name = "gridpoold", about = "Gridpool autoscaling daemon")]
struct Cli {
    /// Data directory for persistent state.
    #[arg(long, default_value = "/var/lib/gridpool")]
    data_dir: PathBuf,

    /// TOML cluster snapshot (nodes, apps, rules).
    #[arg(long)]
    cluster: PathBuf,

    /// Interval between autoscale passes in seconds.
    #[arg(long, default_value = "3600")]
    interval_secs: u64,

    /// How long to wait for a new node to become ready, in seconds.
    #[arg(long, default_value = "300")]
    wait_new_node_secs: u64,

    /// Metadata key advertising node memory capacity in bytes.
    #[arg(long, default_value = "")]
    memory_metadata: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic autoscale loop until interrupted.
    Run,
    /// Execute a single pass, printing audit lines to stdout.
    Once,
}

// ── Cluster snapshot file ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClusterFile {
    #[serde(default)]
    nodes: Vec<NodeEntry>,
    #[serde(default)]
    apps: Vec<AppEntry>,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    address: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    units: Vec<UnitEntry>,
}

#[derive(Debug, Deserialize)]
struct UnitEntry {
    id: String,
    app: String,
    #[serde(default)]
    memory_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct AppEntry {
    name: String,
    pool: String,
}

/// Seed the in-memory backends and the rule store from a snapshot.
fn assemble_backends(cluster: ClusterFile, store: &StateStore) -> anyhow::Result<Backends> {
    let prov = Arc::new(InMemoryProvisioner::new("standalone"));
    let iaas = Arc::new(InMemoryIaas::new());
    let apps = Arc::new(InMemoryApps::new());

    for entry in cluster.nodes {
        let pool = entry
            .metadata
            .get(POOL_METADATA)
            .cloned()
            .unwrap_or_default();
        // A known machine id lets removal passes tear the machine down.
        if let Some(machine_id) = entry.metadata.get(IAAS_ID_METADATA) {
            iaas.register_machine(MachineInfo {
                id: machine_id.clone(),
                address: entry.address.clone(),
                ca_cert: None,
                client_cert: None,
                client_key: None,
            });
        }
        prov.push_node(Node {
            address: entry.address,
            pool,
            metadata: entry.metadata,
            units: entry
                .units
                .into_iter()
                .map(|u| Unit {
                    id: u.id,
                    app: u.app,
                    memory_bytes: u.memory_bytes,
                })
                .collect(),
        });
    }
    for app in cluster.apps {
        apps.push_app(&app.name, &app.pool);
    }
    for rule in &cluster.rules {
        store.put_rule(rule)?;
    }
    info!(
        nodes = prov.node_count(),
        rules = cluster.rules.len(),
        "cluster snapshot loaded"
    );

    Ok(Backends {
        registry: Arc::new(StaticRegistry::new(vec![prov as Arc<dyn NodeProvisioner>])),
        iaas,
        rules: Arc::new(store.clone()),
        events: Arc::new(store.clone()),
        apps,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridpoold=debug,gridpool=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir)?;
    let db_path = cli.data_dir.join("gridpool.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let raw = std::fs::read_to_string(&cli.cluster)?;
    let cluster: ClusterFile = toml::from_str(&raw)?;
    let backends = assemble_backends(cluster, &store)?;

    let config = AutoscaleConfig {
        run_interval: Duration::from_secs(cli.interval_secs),
        wait_new_node: Duration::from_secs(cli.wait_new_node_secs),
        total_memory_metadata: cli.memory_metadata,
    };
    let controller = Controller::new(config, backends);

    match cli.command {
        Command::Run => {
            controller.start().await;
            info!("gridpool daemon started");
            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            controller.shutdown().await;
            info!("gridpool daemon stopped");
        }
        Command::Once => {
            let sink: LogSink = Arc::new(|line: &str| println!("{line}"));
            controller.run_once(Some(sink)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridpool_core::ScalingPolicy;
    use gridpool_state::EventStatus;

    const SNAPSHOT: &str = r#"
        [[nodes]]
        address = "https://10.0.1.1:2376"

        [nodes.metadata]
        pool = "web"
        iaas = "static"
        iaas-id = "m1"

        [[nodes.units]]
        id = "u1"
        app = "blog"
        memory_bytes = 134217728

        [[nodes.units]]
        id = "u2"
        app = "blog"
        memory_bytes = 134217728

        [[apps]]
        name = "blog"
        pool = "web"

        [[rules]]
        pool = "web"
        enabled = true
        prevent_rebalance = false

        [rules.policy]
        mode = "unit_count"
        max_units_per_node = 1
        scale_down_ratio = 1.3333
    "#;

    #[test]
    fn snapshot_parses_nodes_apps_and_rules() {
        let cluster: ClusterFile = toml::from_str(SNAPSHOT).unwrap();

        assert_eq!(cluster.nodes.len(), 1);
        assert_eq!(cluster.nodes[0].units.len(), 2);
        assert_eq!(cluster.apps[0].name, "blog");
        assert!(matches!(
            cluster.rules[0].policy,
            ScalingPolicy::UnitCount {
                max_units_per_node: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn once_pass_scales_the_seeded_cluster() {
        let cluster: ClusterFile = toml::from_str(SNAPSHOT).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let backends = assemble_backends(cluster, &store).unwrap();

        let config = AutoscaleConfig {
            run_interval: Duration::from_secs(60),
            wait_new_node: Duration::from_secs(1),
            total_memory_metadata: String::new(),
        };
        let controller = Controller::new(config, backends);
        controller.run_once(None).await.unwrap();

        // 2 units, 1 node, 1 unit per node max → one node added.
        let events = store.list_events("web").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Done);
        assert_eq!(events[0].outcome.as_ref().unwrap()["result"]["to_add"], 1);
    }
}
