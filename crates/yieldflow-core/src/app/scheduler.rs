//! DistributionScheduler - 日次トリガーと手動トリガー
//!
//! # 状態
//! - no-batch-today: その日の batch がまだない → 作って実行
//! - batch-running: PROCESSING の batch が残っている → 再開（未完了 task のみ）
//! - batch-terminal: 終了済み → 何もしない（冪等スキップ）
//!
//! 日次 batch の ID は日付から決まる（`batch-YYYYMMDD`）。手動 batch は毎回新しい ID。
//! どちらも同じ BatchExecutor に流れる。

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::Collaborators;
use super::executor::BatchExecutor;
use super::task_factory::TaskFactory;
use crate::config::EngineConfig;
use crate::domain::{BatchId, BatchTrigger, DistributionBatch, DistributionError, PositionId};
use crate::ports::{BatchRepository, Clock, IdGenerator, PositionSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The batch for this date already reached a terminal status.
    AlreadyDistributed,
    /// The daily trigger is paused by an operator.
    Paused,
}

/// Outcome of a daily trigger that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DailyTrigger {
    Skipped { batch_id: BatchId, reason: SkipReason },
    Ran { batch: DistributionBatch },
}

pub struct DistributionScheduler {
    executor: Arc<BatchExecutor>,
    factory: TaskFactory,
    positions: Arc<dyn PositionSource>,
    batches: Arc<dyn BatchRepository>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    trigger_time: NaiveTime,
    paused: AtomicBool,
}

impl DistributionScheduler {
    pub fn new(
        collaborators: &Collaborators,
        config: &EngineConfig,
        executor: Arc<BatchExecutor>,
    ) -> Self {
        Self {
            executor,
            factory: TaskFactory::new(collaborators),
            positions: collaborators.positions.clone(),
            batches: collaborators.batches.clone(),
            ids: collaborators.ids.clone(),
            clock: collaborators.clock.clone(),
            trigger_time: config.daily_trigger_time(),
            paused: AtomicBool::new(false),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("daily trigger paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("daily trigger resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Daily trigger for today's date (per the clock).
    pub async fn trigger_daily(&self) -> Result<DailyTrigger, DistributionError> {
        self.trigger_daily_for(self.clock.today()).await
    }

    /// Daily trigger for `date`.
    ///
    /// Returns once the batch is terminal, or with `Err(Unhealthy)` when the
    /// health gate rejected the run (nothing is persisted for a new batch).
    pub async fn trigger_daily_for(
        &self,
        date: NaiveDate,
    ) -> Result<DailyTrigger, DistributionError> {
        let batch_id = BatchId::for_date(date);
        if self.is_paused() {
            info!(batch_id = %batch_id, "daily trigger paused; skipping");
            return Ok(DailyTrigger::Skipped {
                batch_id,
                reason: SkipReason::Paused,
            });
        }

        if let Some(mut existing) = self.batches.get(&batch_id).await? {
            if existing.status.is_terminal() {
                info!(
                    batch_id = %batch_id,
                    status = ?existing.status,
                    "batch already distributed; skipping"
                );
                return Ok(DailyTrigger::Skipped {
                    batch_id,
                    reason: SkipReason::AlreadyDistributed,
                });
            }
            warn!(
                batch_id = %batch_id,
                pending = existing.pending_count(),
                "resuming unfinished batch"
            );
            self.executor.run(&mut existing).await?;
            return Ok(DailyTrigger::Ran { batch: existing });
        }

        let positions = self.positions.list_active_positions().await?;
        let mut batch =
            DistributionBatch::new(batch_id, date, BatchTrigger::Scheduled, self.clock.now());
        batch.set_tasks(self.factory.build_tasks(&positions, &batch.id).await);
        self.executor.run(&mut batch).await?;
        Ok(DailyTrigger::Ran { batch })
    }

    /// Manual trigger: always a new batch. `position_ids` narrows the run to
    /// those active positions; `None` targets every active position.
    pub async fn trigger_manual(
        &self,
        position_ids: Option<&[PositionId]>,
    ) -> Result<DistributionBatch, DistributionError> {
        let mut positions = self.positions.list_active_positions().await?;
        if let Some(wanted) = position_ids {
            let wanted: HashSet<&PositionId> = wanted.iter().collect();
            positions.retain(|p| wanted.contains(&p.id));
            if positions.len() < wanted.len() {
                warn!(
                    requested = wanted.len(),
                    found = positions.len(),
                    "some requested positions are unknown or inactive"
                );
            }
        }

        let now = self.clock.now();
        let mut batch = DistributionBatch::new(
            self.ids.generate_manual_batch_id(),
            now.date_naive(),
            BatchTrigger::Manual,
            now,
        );
        batch.set_tasks(self.factory.build_tasks(&positions, &batch.id).await);
        info!(batch_id = %batch.id, tasks = batch.tasks.len(), "manual distribution triggered");
        self.executor.run(&mut batch).await?;
        Ok(batch)
    }

    /// Run the daily trigger at the configured UTC time until `shutdown`
    /// flips to true or its sender is dropped.
    pub async fn run_daily_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut after = self.clock.now();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = next_fire_after(after, self.trigger_time);
            let wait = (next - self.clock.now()).to_std().unwrap_or_default();
            info!(next = %next, "next daily distribution scheduled");

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.trigger_daily_for(next.date_naive()).await {
                Ok(DailyTrigger::Ran { batch }) => {
                    info!(
                        batch_id = %batch.id,
                        status = ?batch.status,
                        "daily distribution finished"
                    )
                }
                Ok(DailyTrigger::Skipped { batch_id, reason }) => {
                    info!(batch_id = %batch_id, reason = ?reason, "daily distribution skipped")
                }
                Err(e) => error!(error = %e, "daily distribution aborted"),
            }
            after = next.max(self.clock.now());
        }
        info!("daily trigger loop stopped");
    }
}

/// First instant strictly after `now` whose UTC time of day is `at`.
pub fn next_fire_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        now.date_naive()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(at).and_utc())
            .unwrap_or(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertKind, BatchStatus, TaskStatus};
    use crate::ports::RetryQueue;
    use crate::testing::{Harness, position, positions, start_time};
    use chrono::TimeZone;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn scheduler_with(h: &Harness, config: &EngineConfig) -> DistributionScheduler {
        let collaborators = h.collaborators();
        let executor = Arc::new(BatchExecutor::new(&collaborators, config));
        DistributionScheduler::new(&collaborators, config, executor)
    }

    fn scheduler(h: &Harness) -> DistributionScheduler {
        scheduler_with(h, &Harness::config())
    }

    #[rstest]
    #[case::later_today(
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 30, 0).unwrap()
    )]
    #[case::exactly_now_rolls_over(
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        NaiveTime::MIN,
        Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
    )]
    #[case::already_passed(
        Utc.with_ymd_and_hms(2026, 2, 28, 23, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap()
    )]
    fn next_fire_time(
        #[case] now: DateTime<Utc>,
        #[case] at: NaiveTime,
        #[case] expected: DateTime<Utc>,
    ) {
        assert_eq!(next_fire_after(now, at), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn daily_trigger_runs_once_per_date() {
        let h = Harness::new(positions(3));
        let s = scheduler(&h);

        let first = s.trigger_daily().await.unwrap();
        let DailyTrigger::Ran { batch } = first else {
            panic!("expected a run, got {first:?}");
        };
        assert_eq!(batch.id.as_str(), "batch-20260301");
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.total_amount.round_dp(4), dec!(0.9863));

        h.clock.advance(chrono::Duration::hours(20));
        let second = s.trigger_daily().await.unwrap();
        assert_eq!(
            second,
            DailyTrigger::Skipped {
                batch_id: batch.id.clone(),
                reason: SkipReason::AlreadyDistributed,
            }
        );
        assert_eq!(h.transfers.calls(), 3);
        for n in 1..=3 {
            assert_eq!(h.positions.payout_count(&format!("p-{n}")), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_daily_run_leaves_no_batch_and_can_be_retriggered() {
        let h = Harness::new(positions(2));
        h.probe.set_funding(false);
        let s = scheduler(&h);

        let err = s.trigger_daily().await.unwrap_err();
        assert!(matches!(err, DistributionError::Unhealthy(_)));
        assert!(h.store.list().await.unwrap().is_empty());
        assert_eq!(h.alerts.kinds(), vec![AlertKind::FundingShortage]);

        h.probe.set_funding(true);
        let again = s.trigger_daily().await.unwrap();
        assert!(matches!(again, DailyTrigger::Ran { ref batch } if batch.completed_tasks == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn daily_trigger_resumes_unfinished_batch() {
        let h = Harness::new(positions(3));
        let s = scheduler(&h);
        let date = start_time().date_naive();

        // a crashed run: task 1 paid, task 2 mid-flight, task 3 untouched
        let mut crashed = DistributionBatch::new(
            BatchId::for_date(date),
            date,
            BatchTrigger::Scheduled,
            start_time(),
        );
        let tasks = TaskFactory::new(&h.collaborators())
            .build_tasks(&positions(3), &crashed.id)
            .await;
        crashed.set_tasks(tasks);
        crashed.tasks[0].mark_completed("0xpaid".into(), start_time());
        crashed.tasks[1].start_attempt(start_time());
        h.store.put(&crashed).await.unwrap();

        let outcome = s.trigger_daily_for(date).await.unwrap();

        let DailyTrigger::Ran { batch } = outcome else {
            panic!("expected resume");
        };
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.completed_tasks, 3);
        assert_eq!(h.transfers.calls(), 2);
        assert_eq!(h.positions.payout_count("p-1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_trigger_skips() {
        let h = Harness::new(positions(1));
        let s = scheduler(&h);

        s.pause();
        assert!(s.is_paused());
        let outcome = s.trigger_daily().await.unwrap();
        assert!(matches!(
            outcome,
            DailyTrigger::Skipped {
                reason: SkipReason::Paused,
                ..
            }
        ));
        assert_eq!(h.transfers.calls(), 0);

        s.resume();
        assert!(matches!(s.trigger_daily().await.unwrap(), DailyTrigger::Ran { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_always_creates_a_new_batch() {
        let h = Harness::new(positions(3));
        let s = scheduler(&h);

        let a = s.trigger_manual(None).await.unwrap();
        let b = s.trigger_manual(None).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(a.id.is_manual());
        assert_eq!(a.trigger, BatchTrigger::Manual);
        assert_eq!(b.completed_tasks, 3);
        assert_eq!(a.tasks[0].id, b.tasks[0].id);
        assert_ne!(a.tasks[0].tx_hash, b.tasks[0].tx_hash);
        assert_eq!(h.transfers.calls(), 6);
        assert_eq!(h.transfers.issued(), 6);
        assert_eq!(h.positions.payout_count("p-1"), 2);
        assert_eq!(h.store.list().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_targets_selected_positions() {
        let h = Harness::new(positions(3));
        let mut closed = position(4);
        closed.status = crate::domain::PositionStatus::Closed;
        h.positions.add(closed);
        let s = scheduler(&h);

        let wanted = [PositionId::new("p-2"), PositionId::new("p-4")];
        let batch = s.trigger_manual(Some(&wanted)).await.unwrap();

        assert_eq!(batch.total_positions, 1);
        assert_eq!(batch.tasks[0].position_id, PositionId::new("p-2"));
        assert!(batch.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn daily_loop_fires_at_trigger_time_and_stops_on_shutdown() {
        let h = Harness::new(positions(1));
        let config = EngineConfig {
            daily_trigger_hour: 1,
            ..Harness::config()
        };
        let s = Arc::new(scheduler_with(&h, &config));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let s = s.clone();
            async move { s.run_daily_loop(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert!(h.store.list().await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        let batches = h.store.list().await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].id.as_str(), "batch-20260301");
        assert!(h.retry_queue.pending().await.unwrap().is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
