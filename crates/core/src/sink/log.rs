//! Log-based result sink.

use async_trait::async_trait;
use tracing::{info, warn};

use super::traits::ResultSink;
use super::types::{JobNotification, JobOutcome};

/// Sink that writes notifications to the log. Stands in wherever no real
/// notification transport is wired up.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    /// Create a new log sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResultSink for LogSink {
    async fn notify(&self, notification: JobNotification) {
        match &notification.outcome {
            JobOutcome::Succeeded { result_ref } => {
                info!(
                    job_id = %notification.job_id,
                    result = %result_ref,
                    "job succeeded"
                );
            }
            JobOutcome::Failed {
                reason,
                unrecoverable,
            } => {
                warn!(
                    job_id = %notification.job_id,
                    final_stage = %notification.final_stage,
                    unrecoverable,
                    "job failed: {}",
                    reason
                );
            }
        }
    }
}
