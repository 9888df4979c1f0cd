pub mod mailer;

use async_trait::async_trait;

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Dev-mode provider: logs instead of sending.
pub struct LogNotifier;

#[async_trait]
impl NotificationProvider for LogNotifier {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::info!(to = %to, subject = %subject, "email notification (log only)");
        Ok(())
    }
}
