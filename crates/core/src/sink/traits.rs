//! Result sink trait definition.

use async_trait::async_trait;

use super::types::JobNotification;

/// Outward notification contract consumed by the chat-bot collaborator.
///
/// Delivery is fire-and-forget: the coordinator considers a job terminal
/// once its stage is durably recorded, regardless of whether the
/// notification made it out. Implementations own their own retries.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver a terminal notification.
    async fn notify(&self, notification: JobNotification);
}
