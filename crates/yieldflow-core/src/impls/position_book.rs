//! InMemoryPositionBook - 開発用のポジション台帳と商品 APR テーブル
//!
//! CLI は JSON の seed ファイルから読み込み、実行後に書き戻す。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{Position, PositionId, ProductId};
use crate::ports::{Clock, PositionError, PositionSource, ProductInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRate {
    pub id: ProductId,
    pub apr_basis_points: u32,
}

/// Serialized form of the book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionBookSeed {
    #[serde(default)]
    pub products: Vec<ProductRate>,
    #[serde(default)]
    pub positions: Vec<Position>,
}

pub struct InMemoryPositionBook {
    positions: Mutex<BTreeMap<PositionId, Position>>,
    products: HashMap<ProductId, u32>,
    clock: Arc<dyn Clock>,
}

impl InMemoryPositionBook {
    pub fn new(seed: PositionBookSeed, clock: Arc<dyn Clock>) -> Self {
        Self {
            positions: Mutex::new(
                seed.positions
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect(),
            ),
            products: seed
                .products
                .into_iter()
                .map(|p| (p.id, p.apr_basis_points))
                .collect(),
            clock,
        }
    }

    /// Current state, for writing back to the seed file.
    pub async fn snapshot(&self) -> PositionBookSeed {
        let mut products: Vec<ProductRate> = self
            .products
            .iter()
            .map(|(id, bps)| ProductRate {
                id: id.clone(),
                apr_basis_points: *bps,
            })
            .collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));

        PositionBookSeed {
            products,
            positions: self.positions.lock().await.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl PositionSource for InMemoryPositionBook {
    async fn list_active_positions(&self) -> Result<Vec<Position>, PositionError> {
        Ok(self
            .positions
            .lock()
            .await
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect())
    }

    async fn record_payout_payment(
        &self,
        position_id: &PositionId,
        amount: Decimal,
    ) -> Result<Position, PositionError> {
        let mut positions = self.positions.lock().await;
        let position = positions
            .get_mut(position_id)
            .ok_or_else(|| PositionError::NotFound(position_id.clone()))?;
        if !position.is_active() {
            return Err(PositionError::Inactive(position_id.clone()));
        }
        position.apply_payout(amount, self.clock.now());
        Ok(position.clone())
    }
}

#[async_trait]
impl ProductInfo for InMemoryPositionBook {
    async fn apr_basis_points(&self, product_id: &ProductId) -> Option<u32> {
        self.products.get(product_id).copied()
    }
}
