//! Yield distribution task: one position's payout within one batch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{BatchId, PositionId, TaskId, UserId};
use super::state::TaskStatus;

/// Unit of work distributing one cycle's yield to one position.
///
/// Design:
/// - Created once by the task factory and owned by its batch.
/// - All state transitions go through the methods below.
/// - A retried task is re-executed in place; it is never cloned into a new task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldDistributionTask {
    pub id: TaskId,
    pub batch_id: BatchId,
    pub position_id: PositionId,
    pub user_id: UserId,

    /// Payout for this cycle (strictly positive).
    pub amount: Decimal,

    pub status: TaskStatus,

    /// Failed attempts so far.
    pub retry_count: u32,

    pub scheduled_at: DateTime<Utc>,

    /// Start of the most recent attempt.
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Set when the task completes.
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,

    /// Transfer reference, present only when completed.
    #[serde(default)]
    pub tx_hash: Option<String>,

    /// Present only when failed.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl YieldDistributionTask {
    pub fn new(
        batch_id: BatchId,
        position_id: PositionId,
        user_id: UserId,
        amount: Decimal,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::for_position(&position_id, scheduled_at),
            batch_id,
            position_id,
            user_id,
            amount,
            status: TaskStatus::Pending,
            retry_count: 0,
            scheduled_at,
            last_attempt_at: None,
            executed_at: None,
            tx_hash: None,
            failure_reason: None,
        }
    }

    /// Mark as processing.
    pub fn start_attempt(&mut self, at: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.last_attempt_at = Some(at);
    }

    /// Mark as completed with the transfer reference.
    pub fn mark_completed(&mut self, tx_hash: String, at: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.tx_hash = Some(tx_hash);
        self.failure_reason = None;
        self.executed_at = Some(at);
    }

    /// Mark as failed and consume one unit of retry budget.
    pub fn mark_failed(&mut self, reason: String) {
        self.status = TaskStatus::Failed;
        self.failure_reason = Some(reason);
        self.retry_count += 1;
    }

    /// Move a failed task back to Pending for another attempt.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.failure_reason = None;
    }

    /// Is this task failed with retry budget left?
    pub fn can_retry(&self, max_retry_count: u32) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < max_retry_count
    }

    /// Is this task failed with no retry budget left?
    pub fn is_exhausted(&self, max_retry_count: u32) -> bool {
        self.status == TaskStatus::Failed && self.retry_count >= max_retry_count
    }
}
