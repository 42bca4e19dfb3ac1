//! BatchRepository / TaskRepository ports - batch と task の正本（source of truth）
//!
//! # 設計原則
//! - コアロジックは get/put/list のみに依存する（ストレージ技術は問わない）
//! - task は batch に属する。`put_task` は保存済み batch の中の task を置き換える
//! - プロセス再起動後も batch の status と task の status / retry_count / tx_hash が残ること

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{BatchId, DistributionBatch, TaskId, YieldDistributionTask};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("invalid batch id: {0:?}")]
    InvalidId(BatchId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn get(&self, id: &BatchId) -> Result<Option<DistributionBatch>, RepositoryError>;

    /// Insert or overwrite.
    async fn put(&self, batch: &DistributionBatch) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<DistributionBatch>, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_task(
        &self,
        batch_id: &BatchId,
        task_id: &TaskId,
    ) -> Result<Option<YieldDistributionTask>, RepositoryError>;

    /// Overwrite one task inside its stored batch.
    ///
    /// Fails with `BatchNotFound` when the batch was never stored.
    async fn put_task(&self, task: &YieldDistributionTask) -> Result<(), RepositoryError>;

    async fn list_tasks(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<YieldDistributionTask>, RepositoryError>;
}
