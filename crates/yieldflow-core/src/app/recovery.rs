//! RecoveryMonitor - 起動時リカバリとバックグラウンド監視
//!
//! # 役割
//! - 起動時: PROCESSING のまま残った batch を検出してアラート（設定があれば再開）
//! - 定期: HealthGate をポーリングし、劣化したらアラート（次の日次実行の前に気付けるように）
//! - 定期: RetryQueue から期限が来たリトライ wave を取り出して実行
//!
//! # 設計原則
//! - 劣化アラートは状態が変わったときだけ出す（ポーリングごとに連打しない）
//! - 一時的な理由で実行できなかった wave は積み直す

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::Collaborators;
use super::executor::{BatchExecutor, RetryWave};
use super::health_gate::HealthGate;
use crate::config::EngineConfig;
use crate::domain::{AlertKind, BatchId, BatchStatus, DistributionError, ErrorKind};
use crate::ports::{AlertSink, BatchRepository, Clock, RetryEntry, RetryQueue};

/// What startup recovery found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Batches found in PROCESSING.
    pub stale: Vec<BatchId>,
    /// Stale batches that were resumed to a terminal status.
    pub resumed: Vec<BatchId>,
    /// Retry waves still waiting in the queue.
    pub pending_retries: usize,
}

pub struct RecoveryMonitor {
    executor: Arc<BatchExecutor>,
    gate: HealthGate,
    batches: Arc<dyn BatchRepository>,
    retry_queue: Arc<dyn RetryQueue>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    auto_resume: bool,
    health_interval: Duration,
    retry_interval: Duration,
    degraded: AtomicBool,
}

impl RecoveryMonitor {
    pub fn new(
        collaborators: &Collaborators,
        config: &EngineConfig,
        executor: Arc<BatchExecutor>,
    ) -> Self {
        Self {
            executor,
            gate: HealthGate::new(collaborators.probe.clone()),
            batches: collaborators.batches.clone(),
            retry_queue: collaborators.retry_queue.clone(),
            alerts: collaborators.alerts.clone(),
            clock: collaborators.clock.clone(),
            auto_resume: config.auto_resume_on_startup,
            health_interval: config.health_poll_interval(),
            retry_interval: config.retry_poll_interval(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Report every batch left in PROCESSING by a previous process, and
    /// resume them when auto-resume is enabled.
    pub async fn recover_on_startup(&self) -> Result<RecoveryReport, DistributionError> {
        let mut stale: Vec<_> = self
            .batches
            .list()
            .await?
            .into_iter()
            .filter(|b| b.status == BatchStatus::Processing)
            .collect();
        stale.sort_by_key(|b| b.started_at);

        let mut report = RecoveryReport::default();
        for mut batch in stale {
            let pending = batch.pending_count();
            warn!(batch_id = %batch.id, pending, "found unfinished batch from a previous run");
            self.alerts
                .notify(
                    AlertKind::StaleBatch,
                    &format!(
                        "batch {} was left in PROCESSING with {} unfinished task(s)",
                        batch.id, pending
                    ),
                )
                .await;
            report.stale.push(batch.id.clone());

            if !self.auto_resume {
                continue;
            }
            match self.executor.run(&mut batch).await {
                Ok(()) => {
                    info!(batch_id = %batch.id, status = ?batch.status, "unfinished batch resumed");
                    report.resumed.push(batch.id.clone());
                }
                Err(e) => error!(batch_id = %batch.id, error = %e, "failed to resume batch"),
            }
        }

        report.pending_retries = self.retry_queue.pending().await?.len();
        info!(
            stale = report.stale.len(),
            resumed = report.resumed.len(),
            pending_retries = report.pending_retries,
            "startup recovery finished"
        );
        Ok(report)
    }

    /// One health poll outside of any run. Returns whether dependencies are
    /// healthy; alerts on the transition to degraded.
    pub async fn poll_health_once(&self) -> bool {
        match self.gate.check(Decimal::ZERO).await {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    info!("dependencies healthy again");
                }
                true
            }
            Err(failure) => {
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    self.alerts
                        .notify(
                            AlertKind::HealthDegraded,
                            &format!(
                                "{} check failing ahead of the next distribution: {failure}",
                                failure.check_name()
                            ),
                        )
                        .await;
                }
                false
            }
        }
    }

    /// Execute every retry wave whose due time has passed.
    pub async fn process_due_retries(&self) -> Result<Vec<RetryWave>, DistributionError> {
        let now = self.clock.now();
        let due = self.retry_queue.take_due(now).await?;
        let mut waves = Vec::with_capacity(due.len());

        for entry in due {
            match self.executor.retry_failed(&entry.batch_id).await {
                Ok(wave) => {
                    info!(
                        batch_id = %wave.batch_id,
                        retried = wave.retried,
                        recovered = wave.recovered,
                        still_failed = wave.still_failed,
                        "retry wave finished"
                    );
                    waves.push(wave);
                }
                Err(e) if e.kind() == ErrorKind::Permanent => {
                    warn!(batch_id = %entry.batch_id, error = %e, "dropping retry wave");
                }
                Err(e) => {
                    let due_at = self.executor.policy().next_wave_at(now);
                    warn!(
                        batch_id = %entry.batch_id,
                        error = %e,
                        due_at = %due_at,
                        "retry wave postponed"
                    );
                    self.retry_queue
                        .schedule(RetryEntry {
                            batch_id: entry.batch_id,
                            due_at,
                        })
                        .await?;
                }
            }
        }
        Ok(waves)
    }

    /// Health polling and retry draining until `shutdown` flips to true or
    /// its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut health = tokio::time::interval(self.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retries = tokio::time::interval(self.retry_interval);
        retries.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = health.tick() => {
                    self.poll_health_once().await;
                }
                _ = retries.tick() => {
                    if let Err(e) = self.process_due_retries().await {
                        error!(error = %e, "retry processing failed");
                    }
                }
            }
        }
        info!("recovery monitor stopped");
    }
}
