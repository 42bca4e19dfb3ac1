//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # 設計原則
//! - 外部システム（ポジション、商品、送金、ヘルスチェック）は必須。足りなければ build() で失敗する
//! - それ以外（Clock, IdGenerator, AlertSink, ストア, リトライキュー）は開発用のデフォルトを使う
//! - 設定は build() 時に検証（Fail-fast）

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::impls::{InMemoryRetryQueue, InMemoryStore, TracingAlertSink};
use crate::ports::{
    AlertSink, BatchRepository, Clock, HealthProbe, IdGenerator, PositionSource, ProductInfo,
    RetryQueue, SystemClock, TaskRepository, TransferGateway, UlidGenerator,
};

use super::engine::Engine;

/// Every port the engine talks to, resolved.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub positions: Arc<dyn PositionSource>,
    pub products: Arc<dyn ProductInfo>,
    pub transfers: Arc<dyn TransferGateway>,
    pub probe: Arc<dyn HealthProbe>,
    pub alerts: Arc<dyn AlertSink>,
    pub batches: Arc<dyn BatchRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub retry_queue: Arc<dyn RetryQueue>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}. Provide it with the matching with_* method.")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .with_position_book(book)
///     .with_transfers(gateway)
///     .with_probe(probe)
///     .with_store(store)
///     .build()?;
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    positions: Option<Arc<dyn PositionSource>>,
    products: Option<Arc<dyn ProductInfo>>,
    transfers: Option<Arc<dyn TransferGateway>>,
    probe: Option<Arc<dyn HealthProbe>>,
    alerts: Option<Arc<dyn AlertSink>>,
    batches: Option<Arc<dyn BatchRepository>>,
    tasks: Option<Arc<dyn TaskRepository>>,
    retry_queue: Option<Arc<dyn RetryQueue>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_positions(mut self, positions: Arc<dyn PositionSource>) -> Self {
        self.positions = Some(positions);
        self
    }

    pub fn with_products(mut self, products: Arc<dyn ProductInfo>) -> Self {
        self.products = Some(products);
        self
    }

    /// One object serving both positions and product rates.
    pub fn with_position_book<B>(self, book: Arc<B>) -> Self
    where
        B: PositionSource + ProductInfo + 'static,
    {
        self.with_positions(book.clone()).with_products(book)
    }

    pub fn with_transfers(mut self, transfers: Arc<dyn TransferGateway>) -> Self {
        self.transfers = Some(transfers);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// One object serving batches and tasks.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: BatchRepository + TaskRepository + 'static,
    {
        self.batches = Some(store.clone());
        self.tasks = Some(store);
        self
    }

    pub fn with_retry_queue(mut self, retry_queue: Arc<dyn RetryQueue>) -> Self {
        self.retry_queue = Some(retry_queue);
        self
    }

    /// Resolve defaults and check that every required port is present.
    pub fn collaborators(self) -> Result<(EngineConfig, Collaborators), BuildError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let (batches, tasks): (Arc<dyn BatchRepository>, Arc<dyn TaskRepository>) =
            match (self.batches, self.tasks) {
                (Some(b), Some(t)) => (b, t),
                (None, None) => {
                    let store = Arc::new(InMemoryStore::new());
                    let batches: Arc<dyn BatchRepository> = store.clone();
                    let tasks: Arc<dyn TaskRepository> = store;
                    (batches, tasks)
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(BuildError::MissingCollaborator("batch/task repository pair"));
                }
            };

        let collaborators = Collaborators {
            ids,
            clock,
            positions: self
                .positions
                .ok_or(BuildError::MissingCollaborator("positions"))?,
            products: self
                .products
                .ok_or(BuildError::MissingCollaborator("products"))?,
            transfers: self
                .transfers
                .ok_or(BuildError::MissingCollaborator("transfers"))?,
            probe: self.probe.ok_or(BuildError::MissingCollaborator("probe"))?,
            alerts: self.alerts.unwrap_or_else(|| Arc::new(TracingAlertSink)),
            batches,
            tasks,
            retry_queue: self
                .retry_queue
                .unwrap_or_else(|| Arc::new(InMemoryRetryQueue::new())),
        };
        Ok((self.config, collaborators))
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        let (config, collaborators) = self.collaborators()?;
        Ok(Engine::new(config, collaborators))
    }
}
