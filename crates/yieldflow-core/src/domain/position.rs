//! Positions as seen by the distribution engine.
//!
//! The engine only reads positions and asks the positions subsystem to
//! record payouts; it never owns them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{PositionId, ProductId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Matured,
    Closed,
}

/// A user's investment in a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub principal: Decimal,
    pub status: PositionStatus,

    /// Cumulative yield paid out so far.
    #[serde(default)]
    pub total_paid: Decimal,

    #[serde(default)]
    pub last_payout_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub next_payout_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(
        id: impl Into<PositionId>,
        user_id: impl Into<UserId>,
        product_id: impl Into<ProductId>,
        principal: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            product_id: product_id.into(),
            principal,
            status: PositionStatus::Active,
            total_paid: Decimal::ZERO,
            last_payout_at: None,
            next_payout_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Apply one payout: bump the cumulative amount and move the next
    /// payout one day forward.
    pub fn apply_payout(&mut self, amount: Decimal, at: DateTime<Utc>) {
        self.total_paid += amount;
        self.last_payout_at = Some(at);
        self.next_payout_at = Some(at + chrono::Duration::days(1));
    }
}
