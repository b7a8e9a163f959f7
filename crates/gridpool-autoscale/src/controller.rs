//! Controller — owns the periodic autoscale loop.
//!
//! An explicit, caller-constructed instance: `start` spawns the loop,
//! `shutdown` signals and awaits it, `run_once` executes a single pass
//! out of band. Every pass runs behind a fault barrier that converts a
//! panic into [`AutoscaleError::Internal`], so one bad backend can never
//! kill the loop.

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::{AutoscaleConfig, Backends, LogSink, PassContext};
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::orchestrator::run_pass;

struct RunState {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

/// Drives periodic autoscale passes.
pub struct Controller {
    config: AutoscaleConfig,
    backends: Backends,
    run_state: Mutex<Option<RunState>>,
}

impl Controller {
    pub fn new(config: AutoscaleConfig, backends: Backends) -> Self {
        Self {
            config: config.normalized(),
            backends,
            run_state: Mutex::new(None),
        }
    }

    /// Spawn the periodic loop. Returns immediately; a no-op when the
    /// loop is already running.
    pub async fn start(&self) {
        let mut run_state = self.run_state.lock().await;
        if run_state.is_some() {
            debug!("autoscale loop already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ctx = PassContext {
            config: self.config.clone(),
            backends: self.backends.clone(),
            sink: None,
        };
        let interval = self.config.run_interval;
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "autoscale loop started");
            loop {
                if let Err(e) = guarded_pass(&ctx).await {
                    error!(error = %e, "autoscale pass failed");
                }
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = stop_rx.changed() => {
                        info!("autoscale loop shutting down");
                        break;
                    }
                }
            }
        });
        *run_state = Some(RunState {
            handle,
            stop: stop_tx,
        });
    }

    /// Signal the loop and wait for it to finish its current pass.
    /// Idempotent; a no-op when not running.
    pub async fn shutdown(&self) {
        let taken = self.run_state.lock().await.take();
        if let Some(run_state) = taken {
            let _ = run_state.stop.send(true);
            if let Err(e) = run_state.handle.await {
                error!(error = %e, "autoscale loop task failed");
            }
        }
    }

    /// Run a single pass independently of the periodic loop, teeing audit
    /// log lines to the optional sink.
    pub async fn run_once(&self, sink: Option<LogSink>) -> AutoscaleResult<()> {
        let ctx = PassContext {
            config: self.config.clone(),
            backends: self.backends.clone(),
            sink,
        };
        guarded_pass(&ctx).await
    }
}

/// Run one pass in its own task so a panic surfaces as a typed error
/// instead of unwinding into the caller.
async fn guarded_pass(ctx: &PassContext) -> AutoscaleResult<()> {
    let ctx = ctx.clone();
    match tokio::spawn(async move { run_pass(&ctx).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "autoscale pass panicked".to_string());
            Err(AutoscaleError::Internal(message))
        }
        Err(e) => Err(AutoscaleError::Internal(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use gridpool_backend::{
        InMemoryApps, InMemoryIaas, InMemoryProvisioner, NodeProvisioner, ProvisionError,
        ProvisionerRegistry, StaticRegistry,
    };
    use gridpool_state::{EventStatus, StateStore};

    struct PanickingRegistry;

    impl ProvisionerRegistry for PanickingRegistry {
        fn provisioners(&self) -> Result<Vec<Arc<dyn NodeProvisioner>>, ProvisionError> {
            panic!("backend exploded");
        }
    }

    struct FailingRegistry;

    impl ProvisionerRegistry for FailingRegistry {
        fn provisioners(&self) -> Result<Vec<Arc<dyn NodeProvisioner>>, ProvisionError> {
            Err(ProvisionError::Backend("registry down".to_string()))
        }
    }

    fn backends_with(registry: Arc<dyn ProvisionerRegistry>, store: &StateStore) -> Backends {
        Backends {
            registry,
            iaas: Arc::new(InMemoryIaas::new()),
            rules: Arc::new(store.clone()),
            events: Arc::new(store.clone()),
            apps: Arc::new(InMemoryApps::new()),
        }
    }

    fn controller_with(registry: Arc<dyn ProvisionerRegistry>) -> (Controller, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let config = AutoscaleConfig {
            run_interval: Duration::from_millis(10),
            wait_new_node: Duration::from_secs(1),
            total_memory_metadata: String::new(),
        };
        (
            Controller::new(config, backends_with(registry, &store)),
            store,
        )
    }

    #[tokio::test]
    async fn run_once_surfaces_pass_errors() {
        let (controller, _store) = controller_with(Arc::new(FailingRegistry));
        let err = controller.run_once(None).await.unwrap_err();
        assert!(matches!(err, AutoscaleError::Provision(_)));
    }

    #[tokio::test]
    async fn panicking_backend_becomes_an_internal_error() {
        let (controller, _store) = controller_with(Arc::new(PanickingRegistry));
        let err = controller.run_once(None).await.unwrap_err();
        match err {
            AutoscaleError::Internal(message) => assert!(message.contains("backend exploded")),
            other => panic!("expected internal error, got {other}"),
        }
    }

    #[tokio::test]
    async fn start_and_shutdown_are_idempotent() {
        let registry = Arc::new(StaticRegistry::new(Vec::new()));
        let (controller, _store) = controller_with(registry);

        controller.start().await;
        controller.start().await;
        controller.shutdown().await;
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn loop_survives_panicking_passes() {
        let (controller, _store) = controller_with(Arc::new(PanickingRegistry));

        controller.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Shutdown still completes: the loop is alive despite every pass
        // panicking behind the fault barrier.
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn periodic_loop_runs_passes() {
        let prov = InMemoryProvisioner::new("test");
        let mut metadata = gridpool_core::Metadata::new();
        metadata.insert("pool".to_string(), "web".to_string());
        prov.push_node(gridpool_core::Node {
            address: "https://10.0.1.1:2376".to_string(),
            pool: "web".to_string(),
            metadata,
            units: Vec::new(),
        });
        let registry = Arc::new(StaticRegistry::new(vec![
            Arc::new(prov) as Arc<dyn NodeProvisioner>,
        ]));
        let (controller, store) = controller_with(registry);

        controller.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.shutdown().await;

        // No rule is configured, so each pass leaves an aborted record.
        let events = store.list_events("web").unwrap();
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.status == EventStatus::Aborted));
    }

    #[tokio::test]
    async fn run_once_tees_lines_to_the_sink() {
        let prov = InMemoryProvisioner::new("test");
        let mut metadata = gridpool_core::Metadata::new();
        metadata.insert("pool".to_string(), "web".to_string());
        prov.push_node(gridpool_core::Node {
            address: "https://10.0.1.1:2376".to_string(),
            pool: "web".to_string(),
            metadata,
            units: Vec::new(),
        });
        let registry = Arc::new(StaticRegistry::new(vec![
            Arc::new(prov) as Arc<dyn NodeProvisioner>,
        ]));
        let (controller, _store) = controller_with(registry);

        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sink: LogSink = Arc::new(move |line: &str| {
            captured.lock().unwrap().push(line.to_string());
        });

        controller.run_once(Some(sink)).await.unwrap();
        assert!(
            lines
                .lock()
                .unwrap()
                .iter()
                .any(|l| l.contains("no auto scale rule"))
        );
    }
}
