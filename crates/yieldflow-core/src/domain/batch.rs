//! Distribution batch record and aggregate bookkeeping.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{BatchId, TaskId};
use super::state::{BatchStatus, TaskStatus};
use super::task::YieldDistributionTask;

/// How the batch was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTrigger {
    Scheduled,
    Manual,
}

/// One execution cycle of the distribution engine.
///
/// Design: same pattern as the task record.
/// - The batch owns its tasks; aggregates are derived from them.
/// - Aggregates and status are only changed by the executor, through
///   `refresh_aggregates` and `settle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionBatch {
    pub id: BatchId,
    pub date: NaiveDate,
    pub trigger: BatchTrigger,
    pub status: BatchStatus,

    /// Sum of completed payouts.
    pub total_amount: Decimal,
    pub total_positions: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,

    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    pub tasks: Vec<YieldDistributionTask>,
}

impl DistributionBatch {
    pub fn new(
        id: BatchId,
        date: NaiveDate,
        trigger: BatchTrigger,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            date,
            trigger,
            status: BatchStatus::Processing,
            total_amount: Decimal::ZERO,
            total_positions: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            started_at,
            completed_at: None,
            tasks: Vec::new(),
        }
    }

    /// Attach the tasks built for this batch.
    pub fn set_tasks(&mut self, tasks: Vec<YieldDistributionTask>) {
        self.total_positions = tasks.len();
        self.tasks = tasks;
        self.refresh_aggregates();
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&YieldDistributionTask> {
        self.tasks.iter().find(|t| &t.id == task_id)
    }

    /// Replace the stored copy of `task` (matched by id).
    ///
    /// Returns `false` when the task does not belong to this batch.
    pub fn replace_task(&mut self, task: YieldDistributionTask) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    /// Sum of every task's amount; what the funding wallet must cover.
    pub fn estimated_payout(&self) -> Decimal {
        self.tasks.iter().map(|t| t.amount).sum()
    }

    /// Recount completed/failed tasks and the distributed total.
    pub fn refresh_aggregates(&mut self) {
        let mut completed = 0;
        let mut failed = 0;
        let mut distributed = Decimal::ZERO;
        for task in &self.tasks {
            match task.status {
                TaskStatus::Completed => {
                    completed += 1;
                    distributed += task.amount;
                }
                TaskStatus::Failed => failed += 1,
                TaskStatus::Pending | TaskStatus::Processing => {}
            }
        }
        self.completed_tasks = completed;
        self.failed_tasks = failed;
        self.total_amount = distributed;
    }

    /// Every task has a settled outcome.
    pub fn all_settled(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_settled())
    }

    /// Move to a terminal status from the settled task outcomes.
    ///
    /// Returns `false` and stays in PROCESSING while any task is still
    /// pending or in flight.
    pub fn settle(&mut self, at: DateTime<Utc>) -> bool {
        self.refresh_aggregates();
        if !self.all_settled() {
            return false;
        }
        self.status = if self.failed_tasks > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.completed_at = Some(at);
        true
    }

    /// Back to Processing for a retry wave, so a crash mid-wave leaves the
    /// batch visible to recovery.
    pub fn reopen(&mut self) {
        self.status = BatchStatus::Processing;
        self.completed_at = None;
    }

    /// Indices of tasks a (re)started run should execute.
    pub fn runnable_indices(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status.is_runnable())
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of failed tasks with retry budget left.
    pub fn retryable_indices(&self, max_retry_count: u32) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.can_retry(max_retry_count))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn failed(&self) -> impl Iterator<Item = &YieldDistributionTask> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Failed)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.status.is_runnable()).count()
    }
}
