//! Error types for the autoscaling control loop.
//!
//! Errors fall into a few families with different handling: configuration
//! problems are fatal to the current pass, contention (`AppNotLocked`) is
//! expected and deferred to the next pass, backend failures preserve
//! partial success where possible, and `Internal` marks a caught panic.

use std::fmt;

use thiserror::Error;

use gridpool_backend::{AppError, IaasError, ProvisionError, RuleError};

/// Result type alias for control loop operations.
pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Errors surfaced by the autoscaling control loop.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// The model nodes carry no `iaas` metadata, so no machine can be
    /// created for the pool.
    #[error("no IaaS information in nodes metadata")]
    MissingIaasMetadata,

    /// Another operation holds this app's lock; the pass should be
    /// retried later rather than recorded as a failure.
    #[error("unable to lock app {0}")]
    AppNotLocked(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Iaas(#[from] IaasError),

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Apps(#[from] AppError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// A panic caught at the pass fault barrier.
    #[error("internal fault: {0}")]
    Internal(String),
}

/// Several failures from concurrent node tasks, each kept visible.
#[derive(Debug)]
pub struct AggregateError {
    causes: Vec<AutoscaleError>,
}

impl AggregateError {
    pub fn new(causes: Vec<AutoscaleError>) -> Self {
        Self { causes }
    }

    pub fn causes(&self) -> &[AutoscaleError] {
        &self.causes
    }

    /// `Ok(())` when no causes were collected, the aggregate otherwise.
    pub fn into_result(self) -> AutoscaleResult<()> {
        if self.causes.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node operations failed: ", self.causes.len())?;
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
