//! Notification contract
//!
//! Fire-and-forget: implementations must swallow their own delivery failures
//! so a broken mail relay can never abort payment processing.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a notification, best effort.
    async fn send(&self, subject: &str, body: &str, to: &[String]);
}

/// Notifier that only emits a structured log line. Used by deployments where
/// mail delivery lives outside this engine, and as the worker default.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str, to: &[String]) {
        info!(
            subject = subject,
            body = body,
            to = ?to,
            "notification"
        );
    }
}
