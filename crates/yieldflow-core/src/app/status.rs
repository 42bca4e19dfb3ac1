//! Status - 運用者向けの集計ビュー

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{BatchStatus, DistributionBatch};

/// Aggregate distribution statistics across batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub total_batches: usize,
    pub processing_batches: usize,
    pub failed_batches: usize,
    pub total_distributed: Decimal,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub pending_tasks: usize,
    /// completed / (completed + failed); 0 when nothing has settled.
    pub success_rate: f64,
}

impl DistributionStats {
    pub fn from_batches<'a>(batches: impl IntoIterator<Item = &'a DistributionBatch>) -> Self {
        let mut stats = Self::default();
        for batch in batches {
            stats.total_batches += 1;
            match batch.status {
                BatchStatus::Processing => stats.processing_batches += 1,
                BatchStatus::Failed => stats.failed_batches += 1,
                BatchStatus::Completed => {}
            }
            stats.total_distributed += batch.total_amount;
            stats.completed_tasks += batch.completed_tasks;
            stats.failed_tasks += batch.failed_tasks;
            stats.pending_tasks += batch.pending_count();
        }

        let settled = stats.completed_tasks + stats.failed_tasks;
        if settled > 0 {
            stats.success_rate = stats.completed_tasks as f64 / settled as f64;
        }
        stats
    }
}
