//! Health probe for a single-node deployment.
//!
//! - chain: the simulated gateway is always reachable
//! - funding: compared against `--funding-balance` when given
//! - storage: a write probe in the data directory

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;
use yieldflow_core::impls::JsonFileStore;
use yieldflow_core::ports::HealthProbe;

pub struct LocalHealthProbe {
    store: Arc<JsonFileStore>,
    funding_balance: Option<Decimal>,
}

impl LocalHealthProbe {
    pub fn new(store: Arc<JsonFileStore>, funding_balance: Option<Decimal>) -> Self {
        Self {
            store,
            funding_balance,
        }
    }
}

#[async_trait]
impl HealthProbe for LocalHealthProbe {
    async fn check_chain(&self) -> bool {
        true
    }

    async fn check_funding(&self, required: Decimal) -> bool {
        match self.funding_balance {
            Some(balance) if balance < required => {
                warn!(%balance, %required, "funding wallet balance too low");
                false
            }
            _ => true,
        }
    }

    async fn check_storage(&self) -> bool {
        self.store.probe_writable().await
    }
}
