//! Types for the result sink contract.

use serde::{Deserialize, Serialize};

/// Coarse terminal outcome delivered to the sink.
///
/// The internal error taxonomy is deliberately not exposed; consumers only
/// see success, a retryable-looking failure, or an unrecoverable one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Detection finished; `result_ref` points at the detection result.
    Succeeded { result_ref: String },

    /// The job ended without a result.
    Failed {
        /// Human-readable reason.
        reason: String,
        /// True when no replay of the same input can succeed
        /// (e.g. unreadable payload).
        unrecoverable: bool,
    },
}

/// One terminal notification for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobNotification {
    /// ID of the terminal job.
    pub job_id: String,
    /// Terminal stage type ("succeeded", "failed", "dead_lettered").
    pub final_stage: String,
    /// Coarse outcome.
    pub outcome: JobOutcome,
}

impl JobNotification {
    /// Outcome label for logs and metrics.
    pub fn outcome_label(&self) -> &'static str {
        match &self.outcome {
            JobOutcome::Succeeded { .. } => "succeeded",
            JobOutcome::Failed {
                unrecoverable: true,
                ..
            } => "unrecoverable",
            JobOutcome::Failed { .. } => "failed",
        }
    }
}
