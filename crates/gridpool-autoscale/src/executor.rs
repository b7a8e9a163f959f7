//! Node lifecycle executor — concurrent add/remove batches.
//!
//! Additions report partial success: the returned spec list holds exactly
//! the nodes that were both created and registered, alongside at most one
//! representative error. Removals aggregate every failed unregister;
//! machine teardown failures are logged to the event only, since the node
//! is already out of the cluster by then.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info};

use gridpool_backend::{AddNodeOptions, Event, Iaas, NodeProvisioner, RemoveNodeOptions};
use gridpool_core::{
    IAAS_ID_METADATA, IAAS_METADATA, Metadata, Node, NodeSpec, choose_metadata, url_to_host,
};

use crate::error::{AggregateError, AutoscaleError, AutoscaleResult};

/// Create and register `count` new nodes modeled on the existing set.
pub async fn add_nodes(
    event: &Arc<dyn Event>,
    prov: &Arc<dyn NodeProvisioner>,
    iaas: &Arc<dyn Iaas>,
    model_nodes: &[Node],
    count: u32,
    wait_timeout: Duration,
) -> (Vec<NodeSpec>, Option<AutoscaleError>) {
    let metadata = choose_metadata(model_nodes);
    if !metadata.contains_key(IAAS_METADATA) {
        return (Vec::new(), Some(AutoscaleError::MissingIaasMetadata));
    }

    let mut tasks = JoinSet::new();
    for _ in 0..count {
        let event = Arc::clone(event);
        let prov = Arc::clone(prov);
        let iaas = Arc::clone(iaas);
        let metadata = metadata.clone();
        tasks.spawn(async move { add_one(event, prov, iaas, metadata, wait_timeout).await });
    }

    let mut added = Vec::new();
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match flatten(joined) {
            Ok(spec) => added.push(spec),
            Err(e) => {
                error!(error = %e, "adding new machine");
                event.log(&format!("error adding new machine: {e}"));
                first_error.get_or_insert(e);
            }
        }
    }
    (added, first_error)
}

async fn add_one(
    event: Arc<dyn Event>,
    prov: Arc<dyn NodeProvisioner>,
    iaas: Arc<dyn Iaas>,
    mut metadata: Metadata,
    wait_timeout: Duration,
) -> AutoscaleResult<NodeSpec> {
    let iaas_name = metadata
        .get(IAAS_METADATA)
        .cloned()
        .ok_or(AutoscaleError::MissingIaasMetadata)?;
    let machine = iaas.create_machine(&iaas_name, &metadata).await?;
    metadata.insert(IAAS_ID_METADATA.to_string(), machine.id.clone());
    event.log(&format!(
        "new machine {} created on {iaas_name}, waiting for the node to become ready",
        machine.address
    ));

    prov.add_node(AddNodeOptions {
        address: machine.address.clone(),
        metadata,
        wait_timeout,
        ca_cert: machine.ca_cert,
        client_cert: machine.client_cert,
        client_key: machine.client_key,
    })
    .await?;

    let node = prov.get_node(&machine.address).await?;
    info!(address = %node.address, "new node added to the cluster");
    event.log(&format!("new node {} added to the cluster", node.address));
    Ok(node.to_spec())
}

/// Unregister the given nodes and tear down their machines.
pub async fn remove_nodes(
    event: &Arc<dyn Event>,
    prov: &Arc<dyn NodeProvisioner>,
    iaas: &Arc<dyn Iaas>,
    specs: &[NodeSpec],
) -> AutoscaleResult<()> {
    let mut tasks = JoinSet::new();
    for spec in specs {
        let event = Arc::clone(event);
        let prov = Arc::clone(prov);
        let iaas = Arc::clone(iaas);
        let spec = spec.clone();
        tasks.spawn(async move { remove_one(event, prov, iaas, spec).await });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = flatten(joined) {
            error!(error = %e, "removing node");
            failures.push(e);
        }
    }
    AggregateError::new(failures).into_result()
}

async fn remove_one(
    event: Arc<dyn Event>,
    prov: Arc<dyn NodeProvisioner>,
    iaas: Arc<dyn Iaas>,
    spec: NodeSpec,
) -> AutoscaleResult<()> {
    // Without IaaS information the machine could never be torn down, so
    // refuse to unregister the node at all.
    if !spec.metadata.contains_key(IAAS_METADATA) {
        return Err(AutoscaleError::MissingIaasMetadata);
    }
    prov.remove_node(RemoveNodeOptions {
        address: spec.address.clone(),
        rebalance: true,
    })
    .await?;
    event.log(&format!("node {} removed from the cluster", spec.address));

    // The node is gone from the cluster; a failed teardown leaves an
    // orphaned machine for the operator, not a failed pass.
    let lookup = match spec.metadata.get(IAAS_ID_METADATA) {
        Some(id) => id.clone(),
        None => url_to_host(&spec.address).to_string(),
    };
    match iaas.find_machine(&lookup).await {
        Ok(machine) => {
            if let Err(e) = iaas.destroy_machine(&machine.id).await {
                event.log(&format!("unable to destroy machine {}: {e}", machine.id));
            } else {
                event.log(&format!("machine {} destroyed", machine.id));
            }
        }
        Err(e) => {
            event.log(&format!(
                "unable to find machine for node {}: {e}",
                spec.address
            ));
        }
    }
    Ok(())
}

/// Collapse a join result, turning a panicked task into an internal fault.
fn flatten<T>(
    joined: Result<AutoscaleResult<T>, tokio::task::JoinError>,
) -> AutoscaleResult<T> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(AutoscaleError::Internal(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridpool_backend::{EventLog, InMemoryIaas, InMemoryProvisioner, MachineInfo};
    use gridpool_state::StateStore;

    const WAIT: Duration = Duration::from_secs(1);

    fn model_node(address: &str, iaas_name: Option<&str>) -> Node {
        let mut metadata = Metadata::new();
        metadata.insert("pool".to_string(), "web".to_string());
        if let Some(name) = iaas_name {
            metadata.insert(IAAS_METADATA.to_string(), name.to_string());
        }
        Node {
            address: address.to_string(),
            pool: "web".to_string(),
            metadata,
            units: Vec::new(),
        }
    }

    fn fixture() -> (Arc<dyn Event>, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let event = store.begin("web", "autoscale").unwrap();
        (event, store)
    }

    #[tokio::test]
    async fn add_creates_registers_and_reports_specs() {
        let (event, store) = fixture();
        let prov: Arc<dyn NodeProvisioner> = Arc::new(InMemoryProvisioner::new("test"));
        let iaas: Arc<dyn Iaas> = Arc::new(InMemoryIaas::new());
        let models = vec![model_node("https://10.0.2.1:2376", Some("ec2"))];

        let (added, err) = add_nodes(&event, &prov, &iaas, &models, 2, WAIT).await;
        assert!(err.is_none());
        assert_eq!(added.len(), 2);
        for spec in &added {
            assert_eq!(spec.metadata.get("pool").unwrap(), "web");
            assert!(spec.metadata.contains_key(IAAS_ID_METADATA));
        }

        event.done(None, None).unwrap();
        let record = &store.list_events("web").unwrap()[0];
        assert!(record.logs.iter().any(|l| l.contains("added to the cluster")));
    }

    #[tokio::test]
    async fn add_without_iaas_metadata_fails_before_creating_machines() {
        let (event, _store) = fixture();
        let prov: Arc<dyn NodeProvisioner> = Arc::new(InMemoryProvisioner::new("test"));
        let iaas = Arc::new(InMemoryIaas::new());
        let models = vec![model_node("https://10.0.2.1:2376", None)];

        let iaas_dyn: Arc<dyn Iaas> = Arc::clone(&iaas) as Arc<dyn Iaas>;
        let (added, err) = add_nodes(&event, &prov, &iaas_dyn, &models, 2, WAIT).await;
        assert!(added.is_empty());
        assert!(matches!(err, Some(AutoscaleError::MissingIaasMetadata)));
        assert!(iaas.destroyed().is_empty());
    }

    #[tokio::test]
    async fn add_keeps_partial_success() {
        let (event, _store) = fixture();
        let prov = Arc::new(InMemoryProvisioner::new("test"));
        prov.fail_next_adds(1);
        let iaas: Arc<dyn Iaas> = Arc::new(InMemoryIaas::new());
        let models = vec![model_node("https://10.0.2.1:2376", Some("ec2"))];

        let prov_dyn: Arc<dyn NodeProvisioner> = Arc::clone(&prov) as Arc<dyn NodeProvisioner>;
        let (added, err) = add_nodes(&event, &prov_dyn, &iaas, &models, 3, WAIT).await;
        assert_eq!(added.len(), 2);
        assert!(err.is_some());
        assert_eq!(prov.node_count(), 2);
    }

    #[tokio::test]
    async fn remove_unregisters_and_destroys() {
        let (event, store) = fixture();
        let prov = Arc::new(InMemoryProvisioner::new("test"));
        prov.push_node(model_node("https://10.0.2.1:2376", Some("ec2")));
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.register_machine(MachineInfo {
            id: "m1".to_string(),
            address: "https://10.0.2.1:2376".to_string(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
        });

        let mut spec = model_node("https://10.0.2.1:2376", Some("ec2")).to_spec();
        spec.metadata
            .insert(IAAS_ID_METADATA.to_string(), "m1".to_string());

        let prov_dyn: Arc<dyn NodeProvisioner> = Arc::clone(&prov) as Arc<dyn NodeProvisioner>;
        let iaas_dyn: Arc<dyn Iaas> = Arc::clone(&iaas) as Arc<dyn Iaas>;
        remove_nodes(&event, &prov_dyn, &iaas_dyn, &[spec]).await.unwrap();

        assert_eq!(prov.node_count(), 0);
        assert_eq!(iaas.destroyed(), vec!["m1"]);

        event.done(None, None).unwrap();
        let record = &store.list_events("web").unwrap()[0];
        assert!(record.logs.iter().any(|l| l.contains("machine m1 destroyed")));
    }

    #[tokio::test]
    async fn remove_finds_machine_by_host_without_iaas_id() {
        let (event, _store) = fixture();
        let prov = Arc::new(InMemoryProvisioner::new("test"));
        prov.push_node(model_node("https://10.0.2.1:2376", Some("ec2")));
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.register_machine(MachineInfo {
            id: "m1".to_string(),
            address: "https://10.0.2.1:2376".to_string(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
        });

        let spec = model_node("https://10.0.2.1:2376", Some("ec2")).to_spec();
        let prov_dyn: Arc<dyn NodeProvisioner> = Arc::clone(&prov) as Arc<dyn NodeProvisioner>;
        let iaas_dyn: Arc<dyn Iaas> = Arc::clone(&iaas) as Arc<dyn Iaas>;
        remove_nodes(&event, &prov_dyn, &iaas_dyn, &[spec]).await.unwrap();
        assert_eq!(iaas.destroyed(), vec!["m1"]);
    }

    #[tokio::test]
    async fn remove_without_iaas_metadata_keeps_the_node() {
        let (event, _store) = fixture();
        let prov = Arc::new(InMemoryProvisioner::new("test"));
        prov.push_node(model_node("https://10.0.2.1:2376", None));
        let iaas: Arc<dyn Iaas> = Arc::new(InMemoryIaas::new());

        let spec = model_node("https://10.0.2.1:2376", None).to_spec();
        let prov_dyn: Arc<dyn NodeProvisioner> = Arc::clone(&prov) as Arc<dyn NodeProvisioner>;
        let err = remove_nodes(&event, &prov_dyn, &iaas, &[spec])
            .await
            .unwrap_err();

        match err {
            AutoscaleError::Aggregate(aggregate) => {
                assert_eq!(aggregate.causes().len(), 1);
                assert!(matches!(
                    aggregate.causes()[0],
                    AutoscaleError::MissingIaasMetadata
                ));
            }
            other => panic!("expected aggregate error, got {other}"),
        }
        // The node must not be unregistered when its machine could never
        // be torn down.
        assert_eq!(prov.node_count(), 1);
        assert!(prov.removed().is_empty());
    }

    #[tokio::test]
    async fn remove_aggregates_unregister_failures_only() {
        let (event, store) = fixture();
        let prov = Arc::new(InMemoryProvisioner::new("test"));
        prov.push_node(model_node("https://10.0.2.1:2376", Some("ec2")));
        prov.push_node(model_node("https://10.0.2.2:2376", Some("ec2")));
        prov.fail_removal_of("https://10.0.2.2:2376");
        let iaas = Arc::new(InMemoryIaas::new());
        // Destroy will fail for the successfully unregistered node; that
        // must not count against the pass.
        iaas.fail_destroys(true);
        iaas.register_machine(MachineInfo {
            id: "m1".to_string(),
            address: "https://10.0.2.1:2376".to_string(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
        });

        let specs = vec![
            model_node("https://10.0.2.1:2376", Some("ec2")).to_spec(),
            model_node("https://10.0.2.2:2376", Some("ec2")).to_spec(),
        ];
        let prov_dyn: Arc<dyn NodeProvisioner> = Arc::clone(&prov) as Arc<dyn NodeProvisioner>;
        let iaas_dyn: Arc<dyn Iaas> = Arc::clone(&iaas) as Arc<dyn Iaas>;
        let err = remove_nodes(&event, &prov_dyn, &iaas_dyn, &specs)
            .await
            .unwrap_err();

        match err {
            AutoscaleError::Aggregate(aggregate) => assert_eq!(aggregate.causes().len(), 1),
            other => panic!("expected aggregate error, got {other}"),
        }
        assert_eq!(prov.removed(), vec!["https://10.0.2.1:2376"]);
        assert!(iaas.destroyed().is_empty());

        event.done(None, None).unwrap();
        let record = &store.list_events("web").unwrap()[0];
        assert!(
            record
                .logs
                .iter()
                .any(|l| l.contains("unable to destroy machine"))
        );
    }
}
