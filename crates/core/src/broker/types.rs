//! Types for the broker channel.

use thiserror::Error;

/// Errors that can occur on broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot accept or hand out messages right now. Publishers
    /// see this surfaced; the job stays `Pending` for a later retry.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Opaque handle identifying one delivery for ack/nack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle {
    pub(crate) token: u64,
}

impl AckHandle {
    pub(crate) fn new(token: u64) -> Self {
        Self { token }
    }
}

/// One message handed to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// ID of the job to process.
    pub job_id: String,
    /// Handle for acking or nacking this delivery.
    pub handle: AckHandle,
}
