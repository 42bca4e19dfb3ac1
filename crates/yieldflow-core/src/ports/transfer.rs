//! TransferGateway port - オンチェーン送金の抽象化
//!
//! 唯一の「遅くて信頼できない」依存先。wire protocol はここでは扱わない。

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BatchId, PositionId, TaskId, UserId, YieldDistributionTask};

/// One payout transfer.
///
/// `idempotency_key` is `<batch id>:<task id>`: submitting the same key twice
/// must not move funds twice, and must return the reference of the first
/// transfer. Task ids alone repeat across batches built in the same
/// millisecond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub idempotency_key: String,
    pub user_id: UserId,
    pub position_id: PositionId,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn for_task(task: &YieldDistributionTask) -> Self {
        Self {
            idempotency_key: idempotency_key(&task.batch_id, &task.id),
            user_id: task.user_id.clone(),
            position_id: task.position_id.clone(),
            amount: task.amount,
        }
    }
}

fn idempotency_key(batch_id: &BatchId, task_id: &TaskId) -> String {
    format!("{batch_id}:{task_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// External reference (transaction hash).
    pub reference: String,
}

#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("transfer rejected: {0}")]
    Rejected(String),

    #[error("insufficient gas: {0}")]
    InsufficientGas(String),

    #[error("transfer endpoint unavailable: {0}")]
    Unavailable(String),
}

/// TransferGateway は送金を投げて参照 ID を受け取る
#[async_trait]
pub trait TransferGateway: Send + Sync {
    async fn submit(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError>;
}
