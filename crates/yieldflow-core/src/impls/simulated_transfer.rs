//! SimulatedTransferGateway - 開発用の送金ゲートウェイ
//!
//! 実チェーンには送らず、成功率に従って成功/失敗を返す。
//! idempotency_key ごとに最初の参照を覚えておき、同じキーの再送には同じ参照を返す。
//!
//! `with_ledger` を使うと発行済みの参照を JSON ファイルに保存し、プロセスを
//! 跨いでも再送が二重送金にならない。台帳は発行ごとに 1 件増え、削除はしない
//! （開発用ゲートウェイなので上限は設けていない）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::ports::{
    RepositoryError, TransferError, TransferGateway, TransferReceipt, TransferRequest,
};

pub struct SimulatedTransferGateway {
    success_rate: f64,
    latency: Duration,
    issued: Mutex<HashMap<String, String>>,
    ledger: Option<PathBuf>,
}

impl SimulatedTransferGateway {
    /// `success_rate` is clamped to `[0, 1]`.
    pub fn new(success_rate: f64, latency: Duration) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            latency,
            issued: Mutex::new(HashMap::new()),
            ledger: None,
        }
    }

    /// Like `new`, but issued references are loaded from and saved to `path`.
    pub async fn with_ledger(
        success_rate: f64,
        latency: Duration,
        path: impl Into<PathBuf>,
    ) -> Result<Self, RepositoryError> {
        let path = path.into();
        let issued = load_ledger(&path).await?;
        debug!(path = %path.display(), entries = issued.len(), "transfer ledger loaded");
        Ok(Self {
            issued: Mutex::new(issued),
            ledger: Some(path),
            ..Self::new(success_rate, latency)
        })
    }

    pub fn always_succeeds() -> Self {
        Self::new(1.0, Duration::ZERO)
    }

    pub async fn issued_count(&self) -> usize {
        self.issued.lock().await.len()
    }
}

async fn load_ledger(path: &Path) -> Result<HashMap<String, String>, RepositoryError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

async fn save_ledger(path: &Path, issued: &HashMap<String, String>) -> Result<(), RepositoryError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(issued)?).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn random_tx_hash() -> String {
    let hi: u128 = rand::random();
    let lo: u128 = rand::random();
    format!("0x{hi:032x}{lo:032x}")
}

#[async_trait]
impl TransferGateway for SimulatedTransferGateway {
    async fn submit(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        if let Some(reference) = self.issued.lock().await.get(&request.idempotency_key) {
            debug!(key = %request.idempotency_key, "replayed transfer");
            return Ok(TransferReceipt {
                reference: reference.clone(),
            });
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if rand::random::<f64>() >= self.success_rate {
            return Err(TransferError::Unavailable(
                "simulated endpoint failure".to_string(),
            ));
        }

        let mut issued = self.issued.lock().await;
        let reference = issued
            .entry(request.idempotency_key.clone())
            .or_insert_with(random_tx_hash)
            .clone();
        if let Some(path) = &self.ledger
            && let Err(e) = save_ledger(path, &issued).await
        {
            warn!(path = %path.display(), error = %e, "failed to persist transfer ledger");
        }
        Ok(TransferReceipt { reference })
    }
}
