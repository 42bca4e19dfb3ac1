//! HealthGate - バッチ実行前の依存先チェック
//!
//! chain → funding → storage の順に確認し、最初の失敗で打ち切る。
//! 失敗したチェックはそれぞれ別のログとして出す（どの依存先が落ちているか分かるように）。

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::HealthFailure;
use crate::ports::HealthProbe;

#[derive(Clone)]
pub struct HealthGate {
    probe: Arc<dyn HealthProbe>,
}

impl HealthGate {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self { probe }
    }

    /// Run the three sub-checks; `required_funding` is the payout the
    /// funding wallet must cover.
    pub async fn check(&self, required_funding: Decimal) -> Result<(), HealthFailure> {
        if !self.probe.check_chain().await {
            warn!(check = "chain", "health check failed: settlement layer unreachable");
            return Err(HealthFailure::ChainUnreachable);
        }
        if !self.probe.check_funding(required_funding).await {
            warn!(
                check = "funding",
                required = %required_funding,
                "health check failed: funding balance too low"
            );
            return Err(HealthFailure::InsufficientFunding {
                required: required_funding,
            });
        }
        if !self.probe.check_storage().await {
            warn!(check = "storage", "health check failed: storage unreachable");
            return Err(HealthFailure::StorageUnavailable);
        }
        debug!(required = %required_funding, "health checks passed");
        Ok(())
    }

    pub async fn is_healthy(&self, required_funding: Decimal) -> bool {
        self.check(required_funding).await.is_ok()
    }
}
