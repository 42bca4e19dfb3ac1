//! RetryQueue port - 遅延リトライのキュー
//!
//! 失敗 task を持つ batch を「due_at 以降に再実行する」ための遅延キュー。
//! sleep ではなくキューにすることで、プロセス再起動をまたいでリトライが残る。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::BatchId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("retry queue operation failed: {0}")]
    OperationFailed(String),
}

/// A deferred retry wave for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub batch_id: BatchId,
    pub due_at: DateTime<Utc>,
}

/// # 設計原則
/// - batch ごとに最大 1 件（再 schedule は due_at を置き換える）
/// - `take_due` は取り出したエントリを削除する
#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn schedule(&self, entry: RetryEntry) -> Result<(), QueueError>;

    /// Remove and return entries due at or before `now`, earliest first.
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<RetryEntry>, QueueError>;

    /// All entries not yet taken, earliest first.
    async fn pending(&self) -> Result<Vec<RetryEntry>, QueueError>;
}
