//! yieldflow-core
//!
//! Yield distribution engine: computes each active position's daily yield,
//! pays it out in health-gated, chunked batches, and retries failures.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, position, task, batch, state, errors, yield 計算）
//! - **ports**: 抽象化レイヤー（PositionSource, TransferGateway, HealthProbe, Repository, RetryQueue など）
//! - **app**: アプリケーションロジック（executor, scheduler, recovery, engine）
//! - **impls**: 実装（InMemoryStore, JsonFileStore, SimulatedTransferGateway など）
//! - **config**: EngineConfig（defaults → TOML → 環境変数）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Engine, EngineBuilder, TriggerResponse};
pub use config::EngineConfig;
