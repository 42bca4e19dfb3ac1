//! TaskFactory - アクティブなポジションから distribution task を作る
//!
//! - APR が解決できないポジションはスキップ（batch 全体は失敗させない）
//! - 日次利回りが 0 以下ならスキップ（task にならない）
//! - 結果は position_id 順に並べる（chunk 分割を決定的にするため）

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::Collaborators;
use crate::domain::{
    AlertKind, BatchId, Position, PositionId, YieldDistributionTask, daily_yield,
};
use crate::ports::{AlertSink, Clock, ProductInfo};

pub struct TaskFactory {
    products: Arc<dyn ProductInfo>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl TaskFactory {
    pub fn new(collaborators: &Collaborators) -> Self {
        Self {
            products: collaborators.products.clone(),
            alerts: collaborators.alerts.clone(),
            clock: collaborators.clock.clone(),
        }
    }

    pub async fn build_tasks(
        &self,
        positions: &[Position],
        batch_id: &BatchId,
    ) -> Vec<YieldDistributionTask> {
        let created_at = self.clock.now();
        let mut seen: HashSet<&PositionId> = HashSet::new();
        let mut tasks = Vec::with_capacity(positions.len());
        let mut unknown_product = Vec::new();
        let mut invalid = Vec::new();

        for position in positions {
            if !seen.insert(&position.id) {
                warn!(position_id = %position.id, "duplicate position in input; ignoring");
                continue;
            }

            let Some(bps) = self.products.apr_basis_points(&position.product_id).await else {
                warn!(
                    position_id = %position.id,
                    product_id = %position.product_id,
                    "product APR not found; skipping position"
                );
                unknown_product.push(position.id.to_string());
                continue;
            };

            let amount = match daily_yield(position.principal, bps) {
                Ok(amount) => amount,
                Err(e) => {
                    warn!(
                        position_id = %position.id,
                        error = %e,
                        "cannot compute yield; skipping position"
                    );
                    invalid.push(position.id.to_string());
                    continue;
                }
            };

            if amount <= Decimal::ZERO {
                debug!(position_id = %position.id, "zero yield; no task");
                continue;
            }

            tasks.push(YieldDistributionTask::new(
                batch_id.clone(),
                position.id.clone(),
                position.user_id.clone(),
                amount,
                created_at,
            ));
        }

        tasks.sort_by(|a, b| a.position_id.cmp(&b.position_id));

        if !unknown_product.is_empty() {
            self.alerts
                .notify(
                    AlertKind::ProductNotFound,
                    &format!(
                        "batch {batch_id}: skipped {} position(s) with unknown product: {}",
                        unknown_product.len(),
                        unknown_product.join(", ")
                    ),
                )
                .await;
        }
        if !invalid.is_empty() {
            self.alerts
                .notify(
                    AlertKind::InvalidPosition,
                    &format!(
                        "batch {batch_id}: skipped {} position(s) with invalid principal: {}",
                        invalid.len(),
                        invalid.join(", ")
                    ),
                )
                .await;
        }

        info!(
            batch_id = %batch_id,
            positions = positions.len(),
            tasks = tasks.len(),
            "built distribution tasks"
        );
        tasks
    }
}
