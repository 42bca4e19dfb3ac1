//! Errors - エラー型と分類
//!
//! - `HealthFailure`: 実行前チェックの失敗（run 全体を中止する）
//! - `DistributionError`: エンジン操作のエラー
//! - `ErrorKind`: 運用上の分類

use rust_decimal::Decimal;
use thiserror::Error;

use super::alert::AlertKind;
use super::ids::BatchId;
use crate::ports::{PositionError, QueueError, RepositoryError};

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（オペレーター対応が必要）
/// - Infrastructure: 依存先の障害（chain / funding / storage）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Which pre-flight dependency check failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthFailure {
    #[error("settlement layer is unreachable")]
    ChainUnreachable,

    #[error("funding balance cannot cover estimated payout of {required}")]
    InsufficientFunding { required: Decimal },

    #[error("storage is unreachable")]
    StorageUnavailable,
}

impl HealthFailure {
    pub fn alert_kind(&self) -> AlertKind {
        match self {
            HealthFailure::ChainUnreachable => AlertKind::ChainUnreachable,
            HealthFailure::InsufficientFunding { .. } => AlertKind::FundingShortage,
            HealthFailure::StorageUnavailable => AlertKind::StorageUnavailable,
        }
    }

    /// Short name of the failed check, used as a log field.
    pub fn check_name(&self) -> &'static str {
        match self {
            HealthFailure::ChainUnreachable => "chain",
            HealthFailure::InsufficientFunding { .. } => "funding",
            HealthFailure::StorageUnavailable => "storage",
        }
    }
}

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("distribution suspended: {0}")]
    Unhealthy(#[from] HealthFailure),

    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("batch {0} is already running in this process")]
    BatchAlreadyRunning(BatchId),

    #[error("batch {0} has not settled yet; resume it with a trigger instead")]
    BatchNotSettled(BatchId),

    #[error("principal must not be negative (got {0})")]
    InvalidPrincipal(Decimal),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("retry queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("position source error: {0}")]
    Positions(#[from] PositionError),
}

impl DistributionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DistributionError::Unhealthy(_)
            | DistributionError::Repository(_)
            | DistributionError::Queue(_)
            | DistributionError::Positions(_) => ErrorKind::Infrastructure,
            DistributionError::BatchAlreadyRunning(_) => ErrorKind::Transient,
            DistributionError::BatchNotFound(_)
            | DistributionError::BatchNotSettled(_)
            | DistributionError::InvalidPrincipal(_) => ErrorKind::Permanent,
        }
    }
}
