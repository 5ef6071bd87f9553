//! Notification port (driven/secondary port)
//!
//! Forwarding of selected error rows to an external channel. The reference
//! adapter posts to a Slack webhook; a no-op implementation stands in when
//! forwarding is disabled.

use crate::domain::ErrorLog;

/// Port trait for external error forwarding
#[async_trait::async_trait]
pub trait INotifier: Send + Sync {
    /// Forwards one error row; failures are the caller's to swallow
    async fn notify_error(&self, row: &ErrorLog) -> anyhow::Result<()>;
}

/// Notifier that drops everything (forwarding disabled)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait::async_trait]
impl INotifier for NullNotifier {
    async fn notify_error(&self, _row: &ErrorLog) -> anyhow::Result<()> {
        Ok(())
    }
}
