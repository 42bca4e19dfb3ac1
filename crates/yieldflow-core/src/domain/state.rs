//! Batch and task state machines.

use serde::{Deserialize, Serialize};

/// Distribution batch status.
///
/// State transitions:
/// - Processing -> Completed (every task settled, none failed)
/// - Processing -> Failed (every task settled, at least one failed)
/// - Failed -> Processing (a retry wave reopens the batch, then settles it again)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Created and not yet settled (includes runs aborted by the health gate).
    Processing,

    /// All tasks completed.
    Completed,

    /// At least one task failed.
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Yield distribution task status.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed -> Pending (retry, while budget remains)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for its chunk.
    Pending,

    /// An attempt is in flight.
    Processing,

    /// Transfer sent and payout recorded.
    Completed,

    /// Last attempt failed.
    Failed,
}

impl TaskStatus {
    /// Has the last attempt finished (successfully or not)?
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Should a (re)started batch run pick this task up?
    ///
    /// A `Processing` task seen outside an active run was interrupted by a
    /// crash; it is executed again under the same idempotency key.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Processing)
    }
}
