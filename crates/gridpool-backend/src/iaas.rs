//! IaaS (cloud machine provisioning) contract.

use async_trait::async_trait;
use thiserror::Error;

use gridpool_core::Metadata;

/// Errors surfaced by IaaS backends.
#[derive(Debug, Error)]
pub enum IaasError {
    #[error("machine not found: {0}")]
    MachineNotFound(String),

    #[error("iaas backend error: {0}")]
    Backend(String),
}

/// A machine as reported by the IaaS backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    /// IaaS-side machine identifier.
    pub id: String,
    /// Node address the machine is reachable at.
    pub address: String,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

/// Cloud machine lifecycle backend.
#[async_trait]
pub trait Iaas: Send + Sync {
    /// Create a machine on the named IaaS using the given node metadata.
    async fn create_machine(
        &self,
        iaas_name: &str,
        metadata: &Metadata,
    ) -> Result<MachineInfo, IaasError>;

    /// Look a machine up by its IaaS id or its host address.
    async fn find_machine(&self, id_or_address: &str) -> Result<MachineInfo, IaasError>;

    /// Destroy a machine by its IaaS id.
    async fn destroy_machine(&self, id: &str) -> Result<(), IaasError>;
}
