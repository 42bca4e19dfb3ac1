//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システム
//! （ポジション管理、送金、ストレージ、通知）へのインターフェースを提供し、
//! 実装の詳細を隠蔽する。

pub mod alert_sink;
pub mod clock;
pub mod health;
pub mod id_generator;
pub mod positions;
pub mod repository;
pub mod retry_queue;
pub mod transfer;

pub use self::alert_sink::AlertSink;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::health::HealthProbe;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::positions::{PositionError, PositionSource, ProductInfo};
pub use self::repository::{BatchRepository, RepositoryError, TaskRepository};
pub use self::retry_queue::{QueueError, RetryEntry, RetryQueue};
pub use self::transfer::{TransferError, TransferGateway, TransferReceipt, TransferRequest};
