//! InMemoryStore - 開発・テスト用の batch / task ストア
//!
//! HashMap<BatchId, DistributionBatch> を tokio Mutex で保護する。
//! task は batch の中に保持する（batch が task を所有する）。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{BatchId, DistributionBatch, TaskId, YieldDistributionTask};
use crate::ports::{BatchRepository, RepositoryError, TaskRepository};

#[derive(Default)]
pub struct InMemoryStore {
    batches: Mutex<HashMap<BatchId, DistributionBatch>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchRepository for InMemoryStore {
    async fn get(&self, id: &BatchId) -> Result<Option<DistributionBatch>, RepositoryError> {
        Ok(self.batches.lock().await.get(id).cloned())
    }

    async fn put(&self, batch: &DistributionBatch) -> Result<(), RepositoryError> {
        self.batches
            .lock()
            .await
            .insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DistributionBatch>, RepositoryError> {
        Ok(self.batches.lock().await.values().cloned().collect())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn get_task(
        &self,
        batch_id: &BatchId,
        task_id: &TaskId,
    ) -> Result<Option<YieldDistributionTask>, RepositoryError> {
        let batches = self.batches.lock().await;
        Ok(batches
            .get(batch_id)
            .and_then(|b| b.task(task_id))
            .cloned())
    }

    async fn put_task(&self, task: &YieldDistributionTask) -> Result<(), RepositoryError> {
        let mut batches = self.batches.lock().await;
        let batch = batches
            .get_mut(&task.batch_id)
            .ok_or_else(|| RepositoryError::BatchNotFound(task.batch_id.clone()))?;
        if !batch.replace_task(task.clone()) {
            batch.tasks.push(task.clone());
        }
        Ok(())
    }

    async fn list_tasks(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<YieldDistributionTask>, RepositoryError> {
        let batches = self.batches.lock().await;
        let batch = batches
            .get(batch_id)
            .ok_or_else(|| RepositoryError::BatchNotFound(batch_id.clone()))?;
        Ok(batch.tasks.clone())
    }
}
