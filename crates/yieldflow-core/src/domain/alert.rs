//! Alert kinds raised to operators.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Settlement layer unreachable.
    ChainUnreachable,
    /// Funding wallet cannot cover the batch.
    FundingShortage,
    /// Batch/task storage unreachable.
    StorageUnavailable,
    /// Position references a product with no APR.
    ProductNotFound,
    /// Position data the engine refuses to pay against.
    InvalidPosition,
    /// A batch settled with failed tasks.
    BatchFailed,
    /// Tasks used up their retry budget.
    RetryExhausted,
    /// Batch left in PROCESSING by a previous process.
    StaleBatch,
    /// Background health poll found a dependency down.
    HealthDegraded,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::ChainUnreachable => "chain_unreachable",
            AlertKind::FundingShortage => "funding_shortage",
            AlertKind::StorageUnavailable => "storage_unavailable",
            AlertKind::ProductNotFound => "product_not_found",
            AlertKind::InvalidPosition => "invalid_position",
            AlertKind::BatchFailed => "batch_failed",
            AlertKind::RetryExhausted => "retry_exhausted",
            AlertKind::StaleBatch => "stale_batch",
            AlertKind::HealthDegraded => "health_degraded",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
