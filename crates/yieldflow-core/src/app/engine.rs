//! Engine - 運用者向けの API とバックグラウンドタスク
//!
//! # 構成
//! - BatchExecutor を 1 つだけ持ち、Scheduler と RecoveryMonitor で共有する
//!   （claim セットがプロセス内で 1 つになるように）
//! - 読み取り系は BatchRepository を直接読む

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::Collaborators;
use super::executor::{BatchExecutor, RetryWave};
use super::recovery::{RecoveryMonitor, RecoveryReport};
use super::scheduler::{DailyTrigger, DistributionScheduler};
use super::status::DistributionStats;
use crate::config::EngineConfig;
use crate::domain::{
    BatchId, DistributionBatch, DistributionError, PositionId, YieldDistributionTask,
};
use crate::ports::BatchRepository;

/// Structured result of a manual trigger; never an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub batch: Option<DistributionBatch>,
    pub error: Option<String>,
}

pub struct Engine {
    config: EngineConfig,
    batches: Arc<dyn BatchRepository>,
    executor: Arc<BatchExecutor>,
    scheduler: Arc<DistributionScheduler>,
    recovery: Arc<RecoveryMonitor>,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let executor = Arc::new(BatchExecutor::new(&collaborators, &config));
        let scheduler = Arc::new(DistributionScheduler::new(
            &collaborators,
            &config,
            executor.clone(),
        ));
        let recovery = Arc::new(RecoveryMonitor::new(
            &collaborators,
            &config,
            executor.clone(),
        ));
        Self {
            config,
            batches: collaborators.batches,
            executor,
            scheduler,
            recovery,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================
    // Reads
    // ========================================

    pub async fn get_batch(&self, id: &BatchId) -> Result<DistributionBatch, DistributionError> {
        self.batches
            .get(id)
            .await?
            .ok_or_else(|| DistributionError::BatchNotFound(id.clone()))
    }

    /// Most recently started first.
    pub async fn list_recent_batches(
        &self,
        limit: usize,
    ) -> Result<Vec<DistributionBatch>, DistributionError> {
        let mut batches = self.batches.list().await?;
        batches.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        batches.truncate(limit);
        Ok(batches)
    }

    pub async fn stats(&self) -> Result<DistributionStats, DistributionError> {
        let batches = self.batches.list().await?;
        Ok(DistributionStats::from_batches(&batches))
    }

    /// Failed tasks of a batch, including those with retries exhausted.
    pub async fn failed_tasks(
        &self,
        id: &BatchId,
    ) -> Result<Vec<YieldDistributionTask>, DistributionError> {
        let batch = self.get_batch(id).await?;
        Ok(batch.failed().cloned().collect())
    }

    // ========================================
    // Operations
    // ========================================

    /// Re-execute a settled batch's failed tasks that still have budget.
    pub async fn force_retry(&self, id: &BatchId) -> Result<RetryWave, DistributionError> {
        info!(batch_id = %id, "operator forced retry");
        self.executor.retry_failed(id).await
    }

    pub fn pause_daily(&self) {
        self.scheduler.pause();
    }

    pub fn resume_daily(&self) {
        self.scheduler.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    pub async fn trigger_daily(&self) -> Result<DailyTrigger, DistributionError> {
        self.scheduler.trigger_daily().await
    }

    pub async fn trigger_daily_for(
        &self,
        date: chrono::NaiveDate,
    ) -> Result<DailyTrigger, DistributionError> {
        self.scheduler.trigger_daily_for(date).await
    }

    pub async fn trigger_manual(&self, position_ids: Option<Vec<PositionId>>) -> TriggerResponse {
        match self.scheduler.trigger_manual(position_ids.as_deref()).await {
            Ok(batch) => TriggerResponse {
                success: true,
                batch: Some(batch),
                error: None,
            },
            Err(e) => {
                error!(error = %e, "manual distribution failed");
                TriggerResponse {
                    success: false,
                    batch: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn recover_on_startup(&self) -> Result<RecoveryReport, DistributionError> {
        self.recovery.recover_on_startup().await
    }

    pub async fn process_due_retries(&self) -> Result<Vec<RetryWave>, DistributionError> {
        self.recovery.process_due_retries().await
    }

    pub async fn poll_health(&self) -> bool {
        self.recovery.poll_health_once().await
    }

    /// Spawn the daily trigger loop and the recovery monitor.
    pub fn spawn_background(&self) -> BackgroundTasks {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = self.scheduler.clone();
        let rx = shutdown_rx.clone();
        let daily = tokio::spawn(async move { scheduler.run_daily_loop(rx).await });

        let recovery = self.recovery.clone();
        let monitor = tokio::spawn(async move { recovery.run(shutdown_rx).await });

        BackgroundTasks {
            shutdown_tx,
            joins: vec![daily, monitor],
        }
    }
}

/// Handle over the engine's background loops.
/// - dropping `shutdown_tx` also stops them
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Ask the loops to stop. A batch already running finishes its chunk loop.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "background task panicked");
            }
        }
    }
}
