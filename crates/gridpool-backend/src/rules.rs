//! Scaling rule persistence contract.

use thiserror::Error;

use gridpool_core::Rule;

/// Errors surfaced by rule stores. Not-found is not an error — it is the
/// `None` side of the lookup.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule store error: {0}")]
    Backend(String),
}

/// Persisted scaling rules, resolved per pool.
pub trait RuleStore: Send + Sync {
    /// Fetch the rule for this exact pool. The empty pool name addresses
    /// the pool-agnostic default rule.
    fn rule_for_pool(&self, pool: &str) -> Result<Option<Rule>, RuleError>;
}
