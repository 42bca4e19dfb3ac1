//! IdGenerator port - ID 生成の抽象化
//!
//! 手動 batch の ID は日付から決まらないため、ここで生成する。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::BatchId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は非決定的な ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    /// Id for an operator-triggered batch.
    fn generate_manual_batch_id(&self) -> BatchId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の時刻を ULID の timestamp 部分に使うので、
/// FixedClock を使えば timestamp 部分は決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_manual_batch_id(&self) -> BatchId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        BatchId::manual(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
