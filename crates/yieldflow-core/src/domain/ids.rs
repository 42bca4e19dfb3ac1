//! Domain identifiers (strongly-typed IDs).
//!
//! `Id<T>` は文字列を保持し、`T` はコンパイル時の区別だけに使う（PhantomData）。
//! `BatchId` と `PositionId` を取り違えるとコンパイルエラーになる。
//!
//! Identifiers that the engine mints itself carry a marker prefix:
//! - scheduled batch: `batch-YYYYMMDD` (one per calendar date)
//! - manual batch: `batch-manual-<ULID>`
//! - task: `task-<position>-<creation millis>`
//!
//! Identifiers owned by collaborators (positions, users, products) are taken
//! verbatim.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each identifier kind.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used when the engine generates an identifier of this kind.
    fn prefix() -> &'static str;
}

/// Generic string identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Batch {}

impl IdMarker for Batch {
    fn prefix() -> &'static str {
        "batch-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Position {}

impl IdMarker for Position {
    fn prefix() -> &'static str {
        "pos-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Product {}

impl IdMarker for Product {
    fn prefix() -> &'static str {
        "product-"
    }
}

// ========================================
// Type Alias
// ========================================

/// Identifier of a distribution batch (one execution cycle).
pub type BatchId = Id<Batch>;

/// Identifier of a yield distribution task (one position within one batch).
pub type TaskId = Id<Task>;

/// Identifier of a position owned by the positions subsystem.
pub type PositionId = Id<Position>;

/// Identifier of the user holding a position.
pub type UserId = Id<User>;

/// Identifier of an investment product.
pub type ProductId = Id<Product>;

const MANUAL_TAG: &str = "manual-";

impl Id<Batch> {
    /// Deterministic id of the scheduled batch for `date`.
    ///
    /// A second scheduled run on the same date resolves to the same id, which
    /// is what makes the daily trigger idempotent.
    pub fn for_date(date: NaiveDate) -> Self {
        Self::new(format!("{}{}", Batch::prefix(), date.format("%Y%m%d")))
    }

    /// Non-deterministic id for an operator-triggered batch.
    pub fn manual(ulid: Ulid) -> Self {
        Self::new(format!("{}{MANUAL_TAG}{ulid}", Batch::prefix()))
    }

    pub fn is_manual(&self) -> bool {
        self.value
            .strip_prefix(Batch::prefix())
            .is_some_and(|rest| rest.starts_with(MANUAL_TAG))
    }
}

impl Id<Task> {
    /// Task id derived from `(position, creation timestamp)`.
    pub fn for_position(position: &PositionId, created_at: DateTime<Utc>) -> Self {
        Self::new(format!(
            "{}{}-{}",
            Task::prefix(),
            position,
            created_at.timestamp_millis()
        ))
    }
}
