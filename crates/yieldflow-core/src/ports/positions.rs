//! PositionSource / ProductInfo ports - ポジション管理サブシステムとの境界
//!
//! エンジンはポジションを所有しない。読み取りと payout 記録の依頼だけを行う。

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{Position, PositionId, ProductId};

#[derive(Debug, Clone, Error)]
pub enum PositionError {
    #[error("position not found: {0}")]
    NotFound(PositionId),

    #[error("position {0} is not active")]
    Inactive(PositionId),

    #[error("positions backend unavailable: {0}")]
    Unavailable(String),
}

/// PositionSource はアクティブなポジションの一覧と payout 記録を提供
///
/// # 設計原則
/// - `record_payout_payment` は成功した transfer 1 件につき 1 回だけ呼ばれる
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn list_active_positions(&self) -> Result<Vec<Position>, PositionError>;

    /// Add `amount` to the position's cumulative payout and roll its
    /// next-payout bookkeeping forward.
    async fn record_payout_payment(
        &self,
        position_id: &PositionId,
        amount: Decimal,
    ) -> Result<Position, PositionError>;
}

/// ProductInfo は商品の APR（basis points）を解決する
#[async_trait]
pub trait ProductInfo: Send + Sync {
    /// `None` when the product is unknown.
    async fn apr_basis_points(&self, product_id: &ProductId) -> Option<u32>;
}
