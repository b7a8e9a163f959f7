//! Application registry contract.

use async_trait::async_trait;
use thiserror::Error;

/// An application known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub pool: String,
}

/// Errors surfaced by the application registry.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("app registry error: {0}")]
    Backend(String),
}

/// Application listing plus short-lived exclusive app locks.
///
/// Lock acquire/release are synchronous so callers can release from a drop
/// guard on every exit path.
#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// List applications restricted to the given pool.
    async fn list_apps(&self, pool: &str) -> Result<Vec<AppInfo>, AppError>;

    /// Try to take the exclusive lock on an app. Returns false when the
    /// lock is already held by someone else.
    fn acquire_app_lock(&self, app: &str, owner: &str, reason: &str) -> Result<bool, AppError>;

    /// Release a previously acquired lock. Releasing a lock that is not
    /// held is a no-op.
    fn release_app_lock(&self, app: &str);
}
