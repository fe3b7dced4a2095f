//! Traits implemented by stage-processing collaborators.

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{JobEnvelope, Stage};

/// Error raised by a stage processor.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// Retryable failure: timeout, resource exhaustion, flaky upstream.
    #[error("transient processing error: {0}")]
    Transient(String),

    /// Malformed or unreadable input. Never retried; the job dead-letters
    /// on the first occurrence.
    #[error("permanent input error: {0}")]
    PermanentInput(String),
}

impl ProcessError {
    /// Whether the failed attempt may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessError::Transient(_))
    }
}

/// External processing capability for one stage.
///
/// The broker delivers at-least-once, so `process` may be invoked more than
/// once for the same job. Implementations must be idempotent keyed on
/// `job_id` + their stage: a duplicate invocation must produce a result
/// equivalent to the first, with no duplicated downstream side effects.
///
/// There is no cooperative cancellation signal; the executor abandons the
/// call on timeout and discards its result, so the work must be safely
/// abandonable.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// Process the given payload, returning a reference to the produced
    /// artifact (capture) or result (detection).
    async fn process(&self, job_id: &str, payload_ref: &str) -> Result<String, ProcessError>;
}

/// Receives stage outcomes from worker pool executors.
///
/// Pools own only the transient claimed/running sub-state; every decision
/// about what comes next (advancing, retrying, dead-lettering, notifying)
/// belongs to the implementor. The pipeline coordinator is the production
/// implementation.
#[async_trait]
pub trait StageOutcomeHandler: Send + Sync {
    /// The stage completed and produced `output_ref`.
    async fn on_success(&self, job: &JobEnvelope, stage: Stage, output_ref: &str);

    /// The attempt failed (the envelope reflects the claimed attempt).
    async fn on_failure(&self, job: &JobEnvelope, stage: Stage, error: &ProcessError);
}
