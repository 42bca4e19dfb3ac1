//! StaticHealthProbe - フラグで結果を切り替えられる HealthProbe

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::ports::HealthProbe;

#[derive(Debug)]
pub struct StaticHealthProbe {
    chain: AtomicBool,
    funding: AtomicBool,
    storage: AtomicBool,
}

impl StaticHealthProbe {
    pub fn healthy() -> Self {
        Self {
            chain: AtomicBool::new(true),
            funding: AtomicBool::new(true),
            storage: AtomicBool::new(true),
        }
    }

    pub fn set_chain(&self, up: bool) {
        self.chain.store(up, Ordering::SeqCst);
    }

    pub fn set_funding(&self, up: bool) {
        self.funding.store(up, Ordering::SeqCst);
    }

    pub fn set_storage(&self, up: bool) {
        self.storage.store(up, Ordering::SeqCst);
    }
}

impl Default for StaticHealthProbe {
    fn default() -> Self {
        Self::healthy()
    }
}

#[async_trait]
impl HealthProbe for StaticHealthProbe {
    async fn check_chain(&self) -> bool {
        self.chain.load(Ordering::SeqCst)
    }

    async fn check_funding(&self, _required: Decimal) -> bool {
        self.funding.load(Ordering::SeqCst)
    }

    async fn check_storage(&self) -> bool {
        self.storage.load(Ordering::SeqCst)
    }
}
