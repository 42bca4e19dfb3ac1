//! AlertSink port - オペレーター向け通知
//!
//! fire-and-forget。通知の失敗は実装側で握りつぶし、呼び出し元には伝播しない。

use async_trait::async_trait;

use crate::domain::AlertKind;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, kind: AlertKind, message: &str);
}
