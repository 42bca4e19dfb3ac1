//! App - アプリケーション層
//!
//! ports を組み合わせて分配エンジンのロジックを実装する。
//!
//! # 主要コンポーネント
//! - **TaskFactory**: アクティブなポジション → distribution task
//! - **HealthGate**: 実行前の依存先チェック（chain / funding / storage）
//! - **BatchExecutor**: chunk 単位の並行実行、集計、リトライ wave の予約
//! - **DistributionScheduler**: 日次トリガー（冪等）と手動トリガー
//! - **RecoveryMonitor**: 起動時リカバリ、ヘルスポーリング、リトライ wave の実行
//! - **EngineBuilder / Engine**: ワイヤリングと運用者向け API

pub mod builder;
pub mod engine;
pub mod executor;
pub mod health_gate;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod task_factory;

pub use self::builder::{BuildError, Collaborators, EngineBuilder};
pub use self::engine::{BackgroundTasks, Engine, TriggerResponse};
pub use self::executor::{BatchExecutor, RetryWave};
pub use self::health_gate::HealthGate;
pub use self::recovery::{RecoveryMonitor, RecoveryReport};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::scheduler::{DailyTrigger, DistributionScheduler, SkipReason, next_fire_after};
pub use self::status::DistributionStats;
pub use self::task_factory::TaskFactory;
