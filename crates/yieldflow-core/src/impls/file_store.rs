//! JsonFileStore - ディレクトリに JSON で永続化するストア
//!
//! # レイアウト
//! - `<dir>/batches/<batch_id>.json`: batch 1 件（task を含む）
//! - `<dir>/retry-queue.json`: 未実行のリトライ
//!
//! # 実装詳細
//! - 書き込みは一時ファイル + rename（途中でクラッシュしても壊れたファイルを残さない）
//! - 読み書きは 1 つの Mutex で直列化（put_task は read-modify-write のため）

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{BatchId, DistributionBatch, TaskId, YieldDistributionTask};
use crate::ports::{
    BatchRepository, QueueError, RepositoryError, RetryEntry, RetryQueue, TaskRepository,
};

const BATCH_DIR: &str = "batches";
const RETRY_QUEUE_FILE: &str = "retry-queue.json";
const PROBE_FILE: &str = ".probe";

pub struct JsonFileStore {
    root: PathBuf,
    io: Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        fs::create_dir_all(root.join(BATCH_DIR)).await?;
        Ok(Self {
            root,
            io: Mutex::new(()),
        })
    }

    /// Write and delete a probe file; used by the storage health check.
    pub async fn probe_writable(&self) -> bool {
        match write_probe(&self.root.join(PROBE_FILE)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "storage probe failed");
                false
            }
        }
    }

    /// Ids come from operators too; one that could leave `batches/` is rejected.
    fn batch_path(&self, id: &BatchId) -> Result<PathBuf, RepositoryError> {
        let name = id.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(RepositoryError::InvalidId(id.clone()));
        }
        Ok(self.root.join(BATCH_DIR).join(format!("{name}.json")))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RepositoryError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "persisted");
        Ok(())
    }

    async fn read_batch(&self, id: &BatchId) -> Result<Option<DistributionBatch>, RepositoryError> {
        Self::read_json(&self.batch_path(id)?).await
    }

    async fn read_queue(&self) -> Result<Vec<RetryEntry>, RepositoryError> {
        Ok(Self::read_json(&self.root.join(RETRY_QUEUE_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn write_queue(&self, entries: &[RetryEntry]) -> Result<(), RepositoryError> {
        Self::write_json(&self.root.join(RETRY_QUEUE_FILE), &entries).await
    }
}

#[async_trait]
impl BatchRepository for JsonFileStore {
    async fn get(&self, id: &BatchId) -> Result<Option<DistributionBatch>, RepositoryError> {
        let _io = self.io.lock().await;
        self.read_batch(id).await
    }

    async fn put(&self, batch: &DistributionBatch) -> Result<(), RepositoryError> {
        let _io = self.io.lock().await;
        Self::write_json(&self.batch_path(&batch.id)?, batch).await
    }

    async fn list(&self) -> Result<Vec<DistributionBatch>, RepositoryError> {
        let _io = self.io.lock().await;
        let mut batches = Vec::new();
        let mut dir = fs::read_dir(self.root.join(BATCH_DIR)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(batch) = Self::read_json::<DistributionBatch>(&path).await? {
                batches.push(batch);
            }
        }
        Ok(batches)
    }
}

#[async_trait]
impl TaskRepository for JsonFileStore {
    async fn get_task(
        &self,
        batch_id: &BatchId,
        task_id: &TaskId,
    ) -> Result<Option<YieldDistributionTask>, RepositoryError> {
        let _io = self.io.lock().await;
        Ok(self
            .read_batch(batch_id)
            .await?
            .and_then(|b| b.task(task_id).cloned()))
    }

    async fn put_task(&self, task: &YieldDistributionTask) -> Result<(), RepositoryError> {
        let _io = self.io.lock().await;
        let mut batch = self
            .read_batch(&task.batch_id)
            .await?
            .ok_or_else(|| RepositoryError::BatchNotFound(task.batch_id.clone()))?;
        if !batch.replace_task(task.clone()) {
            batch.tasks.push(task.clone());
        }
        Self::write_json(&self.batch_path(&batch.id)?, &batch).await
    }

    async fn list_tasks(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<YieldDistributionTask>, RepositoryError> {
        let _io = self.io.lock().await;
        self.read_batch(batch_id)
            .await?
            .map(|b| b.tasks)
            .ok_or_else(|| RepositoryError::BatchNotFound(batch_id.clone()))
    }
}

async fn write_probe(path: &Path) -> std::io::Result<()> {
    fs::write(path, b"ok").await?;
    fs::remove_file(path).await
}

fn queue_error(e: RepositoryError) -> QueueError {
    QueueError::OperationFailed(e.to_string())
}

#[async_trait]
impl RetryQueue for JsonFileStore {
    async fn schedule(&self, entry: RetryEntry) -> Result<(), QueueError> {
        let _io = self.io.lock().await;
        let mut entries = self.read_queue().await.map_err(queue_error)?;
        entries.retain(|e| e.batch_id != entry.batch_id);
        entries.push(entry);
        entries.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        self.write_queue(&entries).await.map_err(queue_error)
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<RetryEntry>, QueueError> {
        let _io = self.io.lock().await;
        let entries = self.read_queue().await.map_err(queue_error)?;
        let (due, rest): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.due_at <= now);
        if !due.is_empty() {
            self.write_queue(&rest).await.map_err(queue_error)?;
        }
        Ok(due)
    }

    async fn pending(&self) -> Result<Vec<RetryEntry>, QueueError> {
        let _io = self.io.lock().await;
        self.read_queue().await.map_err(queue_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchTrigger, PositionId, TaskStatus, UserId};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn batch(day: u32) -> DistributionBatch {
        let at = Utc.with_ymd_and_hms(2026, 6, day, 0, 0, 0).unwrap();
        let mut b = DistributionBatch::new(
            BatchId::for_date(at.date_naive()),
            at.date_naive(),
            BatchTrigger::Scheduled,
            at,
        );
        b.set_tasks(vec![YieldDistributionTask::new(
            b.id.clone(),
            PositionId::new("p-1"),
            UserId::new("u-1"),
            dec!(0.25),
            at,
        )]);
        b
    }

    #[tokio::test]
    async fn batches_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let b = batch(1);
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store.put(&b).await.unwrap();
        }

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&b.id).await.unwrap(), Some(b));
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn put_task_persists_status_and_retry_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let b = batch(2);
        store.put(&b).await.unwrap();

        let mut task = b.tasks[0].clone();
        task.mark_failed("gas".into());
        store.put_task(&task).await.unwrap();

        let stored = store.get_task(&b.id, &task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn missing_batch_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(store.get(&BatchId::new("batch-nope")).await.unwrap().is_none());
        assert!(store.probe_writable().await);
    }

    #[rstest::rstest]
    #[case::parent("../../x")]
    #[case::nested("batches/x")]
    #[case::backslash("..\\x")]
    #[case::hidden(".hidden")]
    #[case::empty("")]
    #[tokio::test]
    async fn ids_that_escape_the_batch_dir_are_rejected(#[case] id: &str) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let mut b = batch(3);
        b.id = BatchId::new(id);

        assert!(matches!(store.get(&b.id).await, Err(RepositoryError::InvalidId(_))));
        assert!(matches!(store.put(&b).await, Err(RepositoryError::InvalidId(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_queue_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let due = Utc.with_ymd_and_hms(2026, 6, 1, 0, 5, 0).unwrap();
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store
                .schedule(RetryEntry {
                    batch_id: BatchId::new("batch-20260601"),
                    due_at: due,
                })
                .await
                .unwrap();
        }

        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.pending().await.unwrap().len(), 1);
        assert!(store.take_due(due - chrono::Duration::seconds(1)).await.unwrap().is_empty());
        assert_eq!(store.take_due(due).await.unwrap().len(), 1);
        assert!(store.pending().await.unwrap().is_empty());
    }
}
