//! Types for the pipeline coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during coordination.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Job store error.
    #[error("job store error: {0}")]
    Store(#[from] crate::job::StoreError),

    /// Broker error. When raised from `submit`, the job remains `Pending`
    /// and the caller owns the retry.
    #[error("broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),
}

/// Current status of the coordinator, with per-stage job counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    /// Whether the coordinator loops are running.
    pub running: bool,
    /// Jobs created but never handed to the broker.
    pub pending: usize,
    /// Jobs waiting in the capture queue.
    pub capture_queued: usize,
    /// Jobs claimed by a capture executor.
    pub capture_running: usize,
    /// Jobs waiting in the detection queue.
    pub detection_queued: usize,
    /// Jobs claimed by a detection executor.
    pub detection_running: usize,
    /// Jobs that completed successfully.
    pub succeeded: usize,
    /// Jobs parked for manual inspection.
    pub dead_lettered: usize,
}
