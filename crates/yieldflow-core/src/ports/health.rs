//! HealthProbe port - 依存先の疎通確認
//!
//! chain / funding / storage の 3 つを独立に確認する。

use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Settlement layer reachable.
    async fn check_chain(&self) -> bool;

    /// Funding wallet can cover `required` plus fees.
    async fn check_funding(&self, required: Decimal) -> bool;

    /// Batch/task storage reachable.
    async fn check_storage(&self) -> bool;
}
