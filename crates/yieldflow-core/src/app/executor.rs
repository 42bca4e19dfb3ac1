//! BatchExecutor - distribution batch の chunk 実行
//!
//! # フロー
//! 1. HealthGate（失敗したら task を 1 つも実行せずに中止。batch は PROCESSING のまま）
//! 2. 実行対象の task を `batch_size` ごとの chunk に分割
//! 3. chunk 内は並行実行、chunk 間は順次 + 固定ディレイ（back-pressure）
//! 4. 集計して COMPLETED / FAILED を決める（未決着の task が残れば PROCESSING のまま）
//! 5. 失敗があれば RetryQueue にリトライ wave を 1 件積む
//!
//! # 単一 writer
//! - 実行中の batch / task は claim セットに登録され、同じものを同時に 2 回実行しない
//! - chunk 内の各 task は自分のコピーを変更して返し、batch への反映は executor だけが行う

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::Collaborators;
use super::health_gate::HealthGate;
use super::retry::{RetryDecision, RetryPolicy};
use crate::config::EngineConfig;
use crate::domain::{
    AlertKind, BatchId, BatchStatus, DistributionBatch, DistributionError, TaskStatus,
    YieldDistributionTask,
};
use crate::ports::{
    AlertSink, BatchRepository, Clock, PositionSource, RetryEntry, RetryQueue, TaskRepository,
    TransferGateway, TransferRequest,
};

/// Result of one retry wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryWave {
    pub batch_id: BatchId,
    pub retried: usize,
    pub recovered: usize,
    pub still_failed: usize,
    pub status: BatchStatus,
}

/// RAII claim on a key in a shared set; released on drop.
struct Claim<'a, K: Eq + Hash + Clone> {
    set: &'a Mutex<HashSet<K>>,
    key: K,
}

impl<'a, K: Eq + Hash + Clone> Claim<'a, K> {
    fn acquire(set: &'a Mutex<HashSet<K>>, key: K) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then_some(Self { set, key })
    }
}

impl<K: Eq + Hash + Clone> Drop for Claim<'_, K> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct BatchExecutor {
    gate: HealthGate,
    positions: Arc<dyn PositionSource>,
    transfers: Arc<dyn TransferGateway>,
    batches: Arc<dyn BatchRepository>,
    tasks: Arc<dyn TaskRepository>,
    retry_queue: Arc<dyn RetryQueue>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    batch_size: usize,
    chunk_delay: Duration,
    running_batches: Mutex<HashSet<BatchId>>,
    /// Transfer keys of attempts in flight.
    running_tasks: Mutex<HashSet<String>>,
}

impl BatchExecutor {
    pub fn new(collaborators: &Collaborators, config: &EngineConfig) -> Self {
        Self {
            gate: HealthGate::new(collaborators.probe.clone()),
            positions: collaborators.positions.clone(),
            transfers: collaborators.transfers.clone(),
            batches: collaborators.batches.clone(),
            tasks: collaborators.tasks.clone(),
            retry_queue: collaborators.retry_queue.clone(),
            alerts: collaborators.alerts.clone(),
            clock: collaborators.clock.clone(),
            policy: RetryPolicy::from_config(config),
            batch_size: config.batch_size.max(1),
            chunk_delay: config.chunk_delay(),
            running_batches: Mutex::new(HashSet::new()),
            running_tasks: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute every runnable task of `batch` and settle it.
    ///
    /// Fails closed: when the health gate rejects the run, nothing is
    /// executed or persisted and the batch stays in PROCESSING.
    pub async fn run(&self, batch: &mut DistributionBatch) -> Result<(), DistributionError> {
        let _claim = Claim::acquire(&self.running_batches, batch.id.clone())
            .ok_or_else(|| DistributionError::BatchAlreadyRunning(batch.id.clone()))?;

        self.ensure_healthy(&batch.id, batch.estimated_payout()).await?;

        let runnable = batch.runnable_indices();
        info!(
            batch_id = %batch.id,
            tasks = batch.tasks.len(),
            runnable = runnable.len(),
            "starting distribution batch"
        );
        self.batches.put(batch).await?;

        self.execute_in_chunks(batch, &runnable).await;
        self.finish(batch, &runnable, true).await
    }

    /// Re-execute the failed tasks of a settled batch that still have retry
    /// budget. Used by the deferred retry wave and by operator force-retry.
    pub async fn retry_failed(&self, batch_id: &BatchId) -> Result<RetryWave, DistributionError> {
        let _claim = Claim::acquire(&self.running_batches, batch_id.clone())
            .ok_or_else(|| DistributionError::BatchAlreadyRunning(batch_id.clone()))?;

        let mut batch = self
            .batches
            .get(batch_id)
            .await?
            .ok_or_else(|| DistributionError::BatchNotFound(batch_id.clone()))?;
        if !batch.status.is_terminal() {
            return Err(DistributionError::BatchNotSettled(batch_id.clone()));
        }

        let selected = batch.retryable_indices(self.policy.max_retry_count);
        if selected.is_empty() {
            debug!(batch_id = %batch_id, "no retryable tasks");
            return Ok(RetryWave {
                batch_id: batch_id.clone(),
                retried: 0,
                recovered: 0,
                still_failed: batch.failed_tasks,
                status: batch.status,
            });
        }

        let required: Decimal = selected.iter().map(|&i| batch.tasks[i].amount).sum();
        self.ensure_healthy(batch_id, required).await?;

        info!(batch_id = %batch_id, tasks = selected.len(), "starting retry wave");
        for &i in &selected {
            batch.tasks[i].reset_for_retry();
        }
        batch.reopen();
        batch.refresh_aggregates();
        self.batches.put(&batch).await?;

        self.execute_in_chunks(&mut batch, &selected).await;
        let recovered = selected
            .iter()
            .filter(|&&i| batch.tasks[i].status == TaskStatus::Completed)
            .count();
        self.finish(&mut batch, &selected, false).await?;

        Ok(RetryWave {
            batch_id: batch_id.clone(),
            retried: selected.len(),
            recovered,
            still_failed: batch.failed_tasks,
            status: batch.status,
        })
    }

    async fn ensure_healthy(
        &self,
        batch_id: &BatchId,
        required: Decimal,
    ) -> Result<(), DistributionError> {
        if let Err(failure) = self.gate.check(required).await {
            error!(batch_id = %batch_id, check = failure.check_name(), "distribution suspended");
            self.alerts
                .notify(
                    failure.alert_kind(),
                    &format!("batch {batch_id} not executed: {failure}"),
                )
                .await;
            return Err(failure.into());
        }
        Ok(())
    }

    /// Run `indices` chunk by chunk: concurrent within a chunk, sequential
    /// with `chunk_delay` between chunks.
    async fn execute_in_chunks(&self, batch: &mut DistributionBatch, indices: &[usize]) {
        let chunk_count = indices.len().div_ceil(self.batch_size);
        for (n, chunk) in indices.chunks(self.batch_size).enumerate() {
            if n > 0 {
                tokio::time::sleep(self.chunk_delay).await;
            }

            let attempts: Vec<_> = chunk
                .iter()
                .map(|&i| self.execute_task(batch.tasks[i].clone()))
                .collect();
            let settled = join_all(attempts).await;
            for (&i, task) in chunk.iter().zip(settled) {
                batch.tasks[i] = task;
            }

            batch.refresh_aggregates();
            if let Err(e) = self.batches.put(batch).await {
                warn!(batch_id = %batch.id, error = %e, "chunk checkpoint failed");
            }
            debug!(
                batch_id = %batch.id,
                chunk = n + 1,
                chunks = chunk_count,
                completed = batch.completed_tasks,
                failed = batch.failed_tasks,
                "chunk settled"
            );
        }
    }

    /// One attempt of one task. Never fails: every error is recorded on the
    /// returned task.
    async fn execute_task(&self, mut task: YieldDistributionTask) -> YieldDistributionTask {
        let request = TransferRequest::for_task(&task);
        let Some(_claim) = Claim::acquire(&self.running_tasks, request.idempotency_key.clone())
        else {
            warn!(task_id = %task.id, "task already in flight; skipping duplicate attempt");
            return task;
        };

        task.start_attempt(self.clock.now());
        self.persist_task(&task).await;

        if task.amount <= Decimal::ZERO {
            task.mark_failed(format!("non-positive payout amount {}", task.amount));
            self.persist_task(&task).await;
            return task;
        }

        match self.transfers.submit(&request).await {
            Ok(receipt) => {
                match self
                    .positions
                    .record_payout_payment(&task.position_id, task.amount)
                    .await
                {
                    Ok(_) => {
                        debug!(task_id = %task.id, tx = %receipt.reference, "payout completed");
                        task.mark_completed(receipt.reference, self.clock.now());
                    }
                    Err(e) => {
                        warn!(
                            task_id = %task.id,
                            position_id = %task.position_id,
                            tx = %receipt.reference,
                            error = %e,
                            "transfer sent but payout bookkeeping failed"
                        );
                        task.mark_failed(format!(
                            "payout bookkeeping failed after transfer {}: {e}",
                            receipt.reference
                        ));
                    }
                }
            }
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    position_id = %task.position_id,
                    error = %e,
                    "transfer failed"
                );
                task.mark_failed(format!("transfer failed: {e}"));
            }
        }

        self.persist_task(&task).await;
        task
    }

    async fn persist_task(&self, task: &YieldDistributionTask) {
        if let Err(e) = self.tasks.put_task(task).await {
            warn!(task_id = %task.id, error = %e, "failed to persist task state");
        }
    }

    /// Settle the batch, then deal with failures among `attempted`.
    async fn finish(
        &self,
        batch: &mut DistributionBatch,
        attempted: &[usize],
        schedule_wave: bool,
    ) -> Result<(), DistributionError> {
        let now = self.clock.now();
        if !batch.settle(now) {
            self.batches.put(batch).await?;
            warn!(
                batch_id = %batch.id,
                unsettled = batch.pending_count(),
                "batch left in PROCESSING with unsettled tasks"
            );
            return Ok(());
        }
        self.batches.put(batch).await?;
        info!(
            batch_id = %batch.id,
            status = ?batch.status,
            completed = batch.completed_tasks,
            failed = batch.failed_tasks,
            total_amount = %batch.total_amount,
            "distribution batch settled"
        );

        if batch.failed_tasks == 0 {
            return Ok(());
        }

        let mut retry_due = None;
        let mut exhausted = Vec::new();
        for &i in attempted {
            let task = &batch.tasks[i];
            match self.policy.decide(task, now) {
                RetryDecision::Settled => {}
                RetryDecision::Retry { due_at } => retry_due = Some(due_at),
                RetryDecision::GiveUp { reason } => {
                    warn!(task_id = %task.id, reason = %reason, "task needs manual intervention");
                    exhausted.push(task.id.to_string());
                }
            }
        }

        if !exhausted.is_empty() {
            self.alerts
                .notify(
                    AlertKind::RetryExhausted,
                    &format!(
                        "batch {}: {} task(s) exhausted retries: {}",
                        batch.id,
                        exhausted.len(),
                        exhausted.join(", ")
                    ),
                )
                .await;
        }

        if !schedule_wave {
            return Ok(());
        }

        self.alerts
            .notify(
                AlertKind::BatchFailed,
                &format!(
                    "batch {} settled with {} failed task(s) out of {}",
                    batch.id, batch.failed_tasks, batch.total_positions
                ),
            )
            .await;

        if let Some(due_at) = retry_due {
            let entry = RetryEntry {
                batch_id: batch.id.clone(),
                due_at,
            };
            match self.retry_queue.schedule(entry).await {
                Ok(()) => info!(batch_id = %batch.id, due_at = %due_at, "retry wave scheduled"),
                Err(e) => error!(batch_id = %batch.id, error = %e, "failed to schedule retry wave"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TaskFactory;
    use crate::domain::{BatchTrigger, PositionId};
    use crate::testing::{Harness, positions, start_time};
    use rust_decimal_macros::dec;

    async fn new_batch(h: &Harness, n: usize) -> DistributionBatch {
        let collaborators = h.collaborators();
        let id = BatchId::for_date(start_time().date_naive());
        let mut batch = DistributionBatch::new(
            id.clone(),
            start_time().date_naive(),
            BatchTrigger::Scheduled,
            start_time(),
        );
        let tasks = TaskFactory::new(&collaborators)
            .build_tasks(&positions(n), &id)
            .await;
        batch.set_tasks(tasks);
        batch
    }

    fn executor(h: &Harness, config: &EngineConfig) -> BatchExecutor {
        BatchExecutor::new(&h.collaborators(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn all_transfers_succeed() {
        let h = Harness::new(positions(3));
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 3).await;

        ex.run(&mut batch).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.completed_tasks, 3);
        assert_eq!(batch.failed_tasks, 0);
        assert_eq!(batch.total_amount.round_dp(4), dec!(0.9863));
        assert!(batch.completed_at.is_some());
        for task in &batch.tasks {
            assert!(task.tx_hash.is_some());
            assert_eq!(h.positions.payout_count(task.position_id.as_str()), 1);
        }
        assert!(h.retry_queue.pending().await.unwrap().is_empty());
        assert_eq!(h.store.get(&batch.id).await.unwrap(), Some(batch));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_recovers_in_deferred_wave() {
        let h = Harness::new(positions(3));
        h.transfers.fail_times("p-2", 1);
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 3).await;

        ex.run(&mut batch).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.failed_tasks, 1);
        assert_eq!(batch.completed_tasks, 2);
        let failed = &batch.tasks[1];
        assert_eq!(failed.position_id, PositionId::new("p-2"));
        assert_eq!(failed.retry_count, 1);
        assert!(failed.failure_reason.as_deref().unwrap().contains("transfer failed"));
        assert!(failed.tx_hash.is_none());

        let pending = h.retry_queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].due_at, start_time() + chrono::Duration::minutes(5));
        assert!(h.alerts.kinds().contains(&AlertKind::BatchFailed));

        let wave = ex.retry_failed(&batch.id).await.unwrap();
        assert_eq!(wave.retried, 1);
        assert_eq!(wave.recovered, 1);
        assert_eq!(wave.still_failed, 0);
        assert_eq!(wave.status, BatchStatus::Completed);

        let stored = h.store.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.failed().count(), 0);
        assert_eq!(stored.completed_tasks + stored.failed_tasks, stored.total_positions);
        assert_eq!(h.positions.payout_count("p-2"), 1);
        assert_eq!(h.positions.payouts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_funding_aborts_before_any_task() {
        let h = Harness::new(positions(3));
        h.probe.set_funding(false);
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 3).await;

        let err = ex.run(&mut batch).await.unwrap_err();

        assert!(matches!(err, DistributionError::Unhealthy(_)));
        assert_eq!(batch.status, BatchStatus::Processing);
        assert!(batch.tasks.iter().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(h.transfers.calls(), 0);
        assert_eq!(h.alerts.kinds(), vec![AlertKind::FundingShortage]);
        assert!(h.store.get(&batch.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_bound_concurrency_and_pause_between() {
        let h = Harness::new(positions(5));
        let config = EngineConfig {
            batch_size: 2,
            ..Harness::config()
        };
        let ex = executor(&h, &config);
        let mut batch = new_batch(&h, 5).await;

        let started = tokio::time::Instant::now();
        ex.run(&mut batch).await.unwrap();

        assert_eq!(h.transfers.max_in_flight(), 2);
        assert_eq!(h.transfers.calls(), 5);
        assert_eq!(batch.completed_tasks, 5);
        // three chunks, two inter-chunk pauses
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_count_never_exceeds_budget() {
        let h = Harness::new(positions(1));
        h.transfers.fail_times("p-1", 10);
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 1).await;

        ex.run(&mut batch).await.unwrap();
        ex.retry_failed(&batch.id).await.unwrap();
        let last = ex.retry_failed(&batch.id).await.unwrap();
        assert_eq!(last.still_failed, 1);

        let stored = h.store.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[0].retry_count, 3);
        assert!(stored.tasks[0].is_exhausted(3));
        assert!(h.alerts.kinds().contains(&AlertKind::RetryExhausted));

        let noop = ex.retry_failed(&batch.id).await.unwrap();
        assert_eq!(noop.retried, 0);
        assert_eq!(h.transfers.calls(), 3);
        assert_eq!(stored.status, BatchStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn bookkeeping_failure_is_retried_without_second_transfer() {
        let h = Harness::new(positions(1));
        h.positions.fail_recording("p-1", 1);
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 1).await;

        ex.run(&mut batch).await.unwrap();
        assert_eq!(batch.tasks[0].status, TaskStatus::Failed);
        assert!(
            batch.tasks[0]
                .failure_reason
                .as_deref()
                .unwrap()
                .contains("bookkeeping")
        );

        ex.retry_failed(&batch.id).await.unwrap();
        let stored = h.store.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[0].status, TaskStatus::Completed);
        assert_eq!(h.transfers.calls(), 2);
        assert_eq!(h.transfers.issued(), 1);
        assert_eq!(h.positions.payout_count("p-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_batch_only_runs_unsettled_tasks() {
        let h = Harness::new(positions(3));
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 3).await;
        batch.tasks[0].mark_completed("0xdone".into(), start_time());
        batch.tasks[1].start_attempt(start_time());
        batch.refresh_aggregates();

        ex.run(&mut batch).await.unwrap();

        assert_eq!(h.transfers.calls(), 2);
        assert_eq!(h.positions.payout_count("p-1"), 0);
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.tasks[0].tx_hash.as_deref(), Some("0xdone"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_completes_immediately() {
        let h = Harness::new(vec![]);
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 0).await;

        ex.run(&mut batch).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.total_positions, 0);
        assert_eq!(batch.total_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn same_batch_cannot_run_twice_at_once() {
        let h = Harness::new(positions(1));
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 1).await;

        let _held = Claim::acquire(&ex.running_batches, batch.id.clone()).unwrap();
        let err = ex.run(&mut batch).await.unwrap_err();

        assert!(matches!(err, DistributionError::BatchAlreadyRunning(_)));
        assert_eq!(h.transfers.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn task_in_flight_elsewhere_keeps_batch_processing() {
        let h = Harness::new(positions(3));
        let ex = executor(&h, &Harness::config());
        let mut batch = new_batch(&h, 3).await;

        let key = TransferRequest::for_task(&batch.tasks[1]).idempotency_key;
        let held = Claim::acquire(&ex.running_tasks, key).unwrap();
        ex.run(&mut batch).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Processing);
        assert!(batch.completed_at.is_none());
        assert_eq!(batch.completed_tasks, 2);
        assert!(batch.completed_tasks + batch.failed_tasks < batch.total_positions);
        assert_eq!(batch.tasks[1].status, TaskStatus::Pending);
        assert!(h.retry_queue.pending().await.unwrap().is_empty());
        assert!(h.alerts.kinds().is_empty());

        drop(held);
        ex.run(&mut batch).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.completed_tasks, batch.total_positions);
        assert_eq!(h.transfers.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_sharing_task_ids_pay_separately() {
        let h = Harness::new(positions(2));
        let ex = executor(&h, &Harness::config());
        let mut first = new_batch(&h, 2).await;
        let mut second = first.clone();
        second.id = BatchId::new("batch-manual-second");
        for task in &mut second.tasks {
            task.batch_id = second.id.clone();
        }
        assert_eq!(first.tasks[0].id, second.tasks[0].id);

        ex.run(&mut first).await.unwrap();
        ex.run(&mut second).await.unwrap();

        assert_eq!(h.transfers.issued(), 4);
        assert_ne!(first.tasks[0].tx_hash, second.tasks[0].tx_hash);
        assert_eq!(h.positions.payout_count("p-1"), 2);
    }

    #[tokio::test]
    async fn retry_rejects_unsettled_and_unknown_batches() {
        let h = Harness::new(positions(1));
        let ex = executor(&h, &Harness::config());
        let batch = new_batch(&h, 1).await;
        h.store.put(&batch).await.unwrap();

        let err = ex.retry_failed(&batch.id).await.unwrap_err();
        assert!(matches!(err, DistributionError::BatchNotSettled(_)));

        let err = ex.retry_failed(&BatchId::new("batch-missing")).await.unwrap_err();
        assert!(matches!(err, DistributionError::BatchNotFound(_)));
    }

    #[test]
    fn claims_release_on_drop() {
        let set = Mutex::new(HashSet::new());
        {
            let _a = Claim::acquire(&set, 1).unwrap();
            assert!(Claim::acquire(&set, 1).is_none());
        }
        assert!(Claim::acquire(&set, 1).is_some());
    }
}
