//! Impls - ports の実装（開発用・テスト用・単一ノード運用向け）
//!
//! # 含まれる実装
//! - **InMemoryStore** / **JsonFileStore**: batch / task の正本
//! - **InMemoryRetryQueue**: 遅延リトライキュー（JsonFileStore も RetryQueue を実装）
//! - **InMemoryPositionBook**: ポジション台帳 + 商品 APR
//! - **SimulatedTransferGateway**: 送金のシミュレーション
//! - **StaticHealthProbe**, **TracingAlertSink**

pub mod file_store;
pub mod memory_store;
pub mod position_book;
pub mod retry_queue;
pub mod simulated_transfer;
pub mod static_health;
pub mod tracing_alerts;

pub use self::file_store::JsonFileStore;
pub use self::memory_store::InMemoryStore;
pub use self::position_book::{InMemoryPositionBook, PositionBookSeed, ProductRate};
pub use self::retry_queue::InMemoryRetryQueue;
pub use self::simulated_transfer::SimulatedTransferGateway;
pub use self::static_health::StaticHealthProbe;
pub use self::tracing_alerts::TracingAlertSink;
