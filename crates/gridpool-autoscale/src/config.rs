//! Control loop configuration and backend wiring.

use std::sync::Arc;
use std::time::Duration;

use gridpool_backend::{AppRegistry, EventLog, Iaas, ProvisionerRegistry, RuleStore};

/// Default interval between periodic passes.
pub const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default time to wait for a newly added node to become ready.
pub const DEFAULT_WAIT_NEW_NODE: Duration = Duration::from_secs(5 * 60);

/// Owner recorded on app locks taken by the workload census.
pub const LOCK_OWNER: &str = "gridpool-autoscale";

/// Event kind used for audit records and the per-pool run lock.
pub const EVENT_KIND: &str = "autoscale";

/// Tunables for the control loop.
#[derive(Debug, Clone)]
pub struct AutoscaleConfig {
    /// Interval between periodic passes. Zero is coerced to the default.
    pub run_interval: Duration,
    /// How long to wait for a new node to become ready. Zero is coerced
    /// to the default.
    pub wait_new_node: Duration,
    /// Metadata key advertising a node's total memory capacity in bytes.
    /// Empty means unconfigured; the memory policy requires it.
    pub total_memory_metadata: String,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            run_interval: DEFAULT_RUN_INTERVAL,
            wait_new_node: DEFAULT_WAIT_NEW_NODE,
            total_memory_metadata: String::new(),
        }
    }
}

impl AutoscaleConfig {
    /// Coerce zero durations to their defaults.
    pub fn normalized(mut self) -> Self {
        if self.run_interval.is_zero() {
            self.run_interval = DEFAULT_RUN_INTERVAL;
        }
        if self.wait_new_node.is_zero() {
            self.wait_new_node = DEFAULT_WAIT_NEW_NODE;
        }
        self
    }
}

/// Receives a copy of every audit log line written during a pass.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Cheap-clone bundle of the backend handles the loop runs against.
#[derive(Clone)]
pub struct Backends {
    pub registry: Arc<dyn ProvisionerRegistry>,
    pub iaas: Arc<dyn Iaas>,
    pub rules: Arc<dyn RuleStore>,
    pub events: Arc<dyn EventLog>,
    pub apps: Arc<dyn AppRegistry>,
}

/// Everything one pass needs.
#[derive(Clone)]
pub struct PassContext {
    pub config: AutoscaleConfig,
    pub backends: Backends,
    /// Optional tee for audit log lines.
    pub sink: Option<LogSink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_coerces_zero_durations() {
        let config = AutoscaleConfig {
            run_interval: Duration::ZERO,
            wait_new_node: Duration::ZERO,
            total_memory_metadata: String::new(),
        }
        .normalized();

        assert_eq!(config.run_interval, DEFAULT_RUN_INTERVAL);
        assert_eq!(config.wait_new_node, DEFAULT_WAIT_NEW_NODE);
    }

    #[test]
    fn normalized_keeps_explicit_values() {
        let config = AutoscaleConfig {
            run_interval: Duration::from_secs(30),
            wait_new_node: Duration::from_secs(10),
            total_memory_metadata: "memory".to_string(),
        }
        .normalized();

        assert_eq!(config.run_interval, Duration::from_secs(30));
        assert_eq!(config.wait_new_node, Duration::from_secs(10));
    }
}
