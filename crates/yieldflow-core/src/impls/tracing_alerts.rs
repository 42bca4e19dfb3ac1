//! TracingAlertSink - アラートをログに出すだけの AlertSink

use async_trait::async_trait;
use tracing::error;

use crate::domain::AlertKind;
use crate::ports::AlertSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(&self, kind: AlertKind, message: &str) {
        error!(alert = %kind, "{message}");
    }
}
