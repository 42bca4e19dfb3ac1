//! Test doubles shared by the app tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::app::Collaborators;
use crate::config::EngineConfig;
use crate::domain::{AlertKind, Position, PositionId, ProductId};
use crate::impls::{InMemoryRetryQueue, InMemoryStore, StaticHealthProbe};
use crate::ports::{
    AlertSink, FixedClock, PositionError, PositionSource, ProductInfo, TransferError,
    TransferGateway, TransferReceipt, TransferRequest, UlidGenerator,
};

pub(crate) const PRODUCT: &str = "prod-12";

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

/// Position `p-<n>` with 1000 principal in the 12% product.
pub(crate) fn position(n: usize) -> Position {
    Position::new(format!("p-{n}"), format!("u-{n}"), PRODUCT, dec!(1000))
}

pub(crate) fn positions(n: usize) -> Vec<Position> {
    (1..=n).map(position).collect()
}

// ========================================
// PositionSource
// ========================================

#[derive(Default)]
pub(crate) struct FakePositions {
    positions: Mutex<BTreeMap<PositionId, Position>>,
    payouts: Mutex<Vec<(PositionId, Decimal)>>,
    record_failures: Mutex<HashMap<PositionId, u32>>,
}

impl FakePositions {
    pub(crate) fn new(positions: Vec<Position>) -> Self {
        Self {
            positions: Mutex::new(positions.into_iter().map(|p| (p.id.clone(), p)).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn add(&self, position: Position) {
        lock(&self.positions).insert(position.id.clone(), position);
    }

    /// Make the next `times` payout recordings for `id` fail.
    pub(crate) fn fail_recording(&self, id: &str, times: u32) {
        lock(&self.record_failures).insert(PositionId::new(id), times);
    }

    pub(crate) fn payouts(&self) -> Vec<(PositionId, Decimal)> {
        lock(&self.payouts).clone()
    }

    pub(crate) fn payout_count(&self, id: &str) -> usize {
        let id = PositionId::new(id);
        lock(&self.payouts).iter().filter(|(p, _)| *p == id).count()
    }
}

#[async_trait]
impl PositionSource for FakePositions {
    async fn list_active_positions(&self) -> Result<Vec<Position>, PositionError> {
        Ok(lock(&self.positions)
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
        if let Some(left) = lock(&self.record_failures).get_mut(position_id)
            && *left > 0
        {
            *left -= 1;
            return Err(PositionError::Unavailable("scripted failure".into()));
        }
        let mut positions = lock(&self.positions);
        let position = positions
            .get_mut(position_id)
            .ok_or_else(|| PositionError::NotFound(position_id.clone()))?;
        position.apply_payout(amount, start_time());
        lock(&self.payouts).push((position_id.clone(), amount));
        Ok(position.clone())
    }
}

// ========================================
// ProductInfo
// ========================================

pub(crate) struct FakeProducts(HashMap<ProductId, u32>);

impl FakeProducts {
    pub(crate) fn with(rates: &[(&str, u32)]) -> Self {
        Self(rates.iter().map(|(id, bps)| (ProductId::new(*id), *bps)).collect())
    }
}

#[async_trait]
impl ProductInfo for FakeProducts {
    async fn apr_basis_points(&self, product_id: &ProductId) -> Option<u32> {
        self.0.get(product_id).copied()
    }
}

// ========================================
// TransferGateway
// ========================================

/// Gateway with scripted per-position failures and a concurrency high-water mark.
pub(crate) struct ScriptedTransfers {
    latency: Duration,
    failures: Mutex<HashMap<PositionId, u32>>,
    issued: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransfers {
    pub(crate) fn new(latency: Duration) -> Self {
        Self {
            latency,
            failures: Mutex::new(HashMap::new()),
            issued: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` transfers for `position`.
    pub(crate) fn fail_times(&self, position: &str, times: u32) {
        lock(&self.failures).insert(PositionId::new(position), times);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Distinct transfers that moved funds.
    pub(crate) fn issued(&self) -> usize {
        lock(&self.issued).len()
    }
}

#[async_trait]
impl TransferGateway for ScriptedTransfers {
    async fn submit(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(left) = lock(&self.failures).get_mut(&request.position_id)
            && *left > 0
        {
            *left -= 1;
            return Err(TransferError::Unavailable("scripted failure".into()));
        }

        let mut issued = lock(&self.issued);
        let next = issued.len();
        let reference = issued
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| format!("0x{next:064x}"))
            .clone();
        Ok(TransferReceipt { reference })
    }
}

// ========================================
// AlertSink
// ========================================

#[derive(Default)]
pub(crate) struct RecordingAlerts(Mutex<Vec<(AlertKind, String)>>);

impl RecordingAlerts {
    pub(crate) fn kinds(&self) -> Vec<AlertKind> {
        lock(&self.0).iter().map(|(k, _)| *k).collect()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        lock(&self.0).iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn notify(&self, kind: AlertKind, message: &str) {
        lock(&self.0).push((kind, message.to_string()));
    }
}

// ========================================
// Harness
// ========================================

pub(crate) struct Harness {
    pub clock: Arc<FixedClock>,
    pub positions: Arc<FakePositions>,
    pub products: Arc<FakeProducts>,
    pub transfers: Arc<ScriptedTransfers>,
    pub probe: Arc<StaticHealthProbe>,
    pub alerts: Arc<RecordingAlerts>,
    pub store: Arc<InMemoryStore>,
    pub retry_queue: Arc<InMemoryRetryQueue>,
}

impl Harness {
    pub(crate) fn new(positions: Vec<Position>) -> Self {
        Self {
            clock: Arc::new(FixedClock::new(start_time())),
            positions: Arc::new(FakePositions::new(positions)),
            products: Arc::new(FakeProducts::with(&[(PRODUCT, 1200)])),
            transfers: Arc::new(ScriptedTransfers::new(Duration::from_millis(10))),
            probe: Arc::new(StaticHealthProbe::healthy()),
            alerts: Arc::new(RecordingAlerts::default()),
            store: Arc::new(InMemoryStore::new()),
            retry_queue: Arc::new(InMemoryRetryQueue::new()),
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        let clock: Arc<dyn crate::ports::Clock> = self.clock.clone();
        Collaborators {
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
            positions: self.positions.clone(),
            products: self.products.clone(),
            transfers: self.transfers.clone(),
            probe: self.probe.clone(),
            alerts: self.alerts.clone(),
            batches: self.store.clone(),
            tasks: self.store.clone(),
            retry_queue: self.retry_queue.clone(),
        }
    }

    pub(crate) fn config() -> EngineConfig {
        EngineConfig::default()
    }
}
