//! Failure notifications.
//!
//! Alerts are fire-and-forget: a failed notification is logged and
//! dropped, never retried and never allowed to affect the pass.

pub mod webhook;

use async_trait::async_trait;
use tracing::warn;

pub use webhook::SlackWebhook;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Sink used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, message: &str) {
        warn!(alert = message, "sync alert");
    }
}
