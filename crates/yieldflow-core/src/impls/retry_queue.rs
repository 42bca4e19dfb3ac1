//! InMemoryRetryQueue - 開発用の遅延リトライキュー
//!
//! # 実装詳細
//! - BinaryHeap（Reverse ordering で min-heap）に due_at 順で積む
//! - batch ごとの最新 due_at を HashMap で保持し、古いエントリは取り出し時に捨てる

use std::collections::{BinaryHeap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::BatchId;
use crate::ports::{QueueError, RetryEntry, RetryQueue};

/// Heap entry ordered so that the earliest `due_at` pops first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledRetry {
    due_at: DateTime<Utc>,
    batch_id: BatchId,
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.batch_id.cmp(&self.batch_id))
    }
}

#[derive(Default)]
struct RetryQueueState {
    heap: BinaryHeap<ScheduledRetry>,
    /// Current due time per batch; heap entries that disagree are stale.
    latest: HashMap<BatchId, DateTime<Utc>>,
}

impl RetryQueueState {
    fn schedule(&mut self, entry: RetryEntry) {
        self.latest.insert(entry.batch_id.clone(), entry.due_at);
        self.heap.push(ScheduledRetry {
            due_at: entry.due_at,
            batch_id: entry.batch_id,
        });
    }

    fn take_due(&mut self, now: DateTime<Utc>) -> Vec<RetryEntry> {
        let mut due = Vec::new();
        while let Some(head) = self.heap.peek() {
            if head.due_at > now {
                break;
            }
            let Some(head) = self.heap.pop() else {
                break;
            };
            if self.latest.get(&head.batch_id) == Some(&head.due_at) {
                self.latest.remove(&head.batch_id);
                due.push(RetryEntry {
                    batch_id: head.batch_id,
                    due_at: head.due_at,
                });
            }
        }
        due
    }

    fn pending(&self) -> Vec<RetryEntry> {
        let mut entries: Vec<RetryEntry> = self
            .latest
            .iter()
            .map(|(batch_id, due_at)| RetryEntry {
                batch_id: batch_id.clone(),
                due_at: *due_at,
            })
            .collect();
        entries.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.batch_id.cmp(&b.batch_id)));
        entries
    }
}

#[derive(Default)]
pub struct InMemoryRetryQueue {
    state: Mutex<RetryQueueState>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn schedule(&self, entry: RetryEntry) -> Result<(), QueueError> {
        self.state.lock().await.schedule(entry);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<RetryEntry>, QueueError> {
        Ok(self.state.lock().await.take_due(now))
    }

    async fn pending(&self) -> Result<Vec<RetryEntry>, QueueError> {
        Ok(self.state.lock().await.pending())
    }
}
