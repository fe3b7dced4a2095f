//! Mock stage processor for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::worker::{ProcessError, StageProcessor};

/// A recorded process invocation for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedProcess {
    /// Job the invocation was for.
    pub job_id: String,
    /// Payload reference that was passed in.
    pub payload_ref: String,
    /// When the invocation happened.
    pub timestamp: DateTime<Utc>,
}

type ProcessHandler = Box<dyn Fn(&str, &str) -> Result<String, ProcessError> + Send + Sync>;

/// Mock implementation of the [`StageProcessor`] trait.
///
/// Provides controllable behavior for testing:
/// - Record invocations for assertions
/// - Script a queue of outcomes, or install a handler closure
/// - Simulate slow processing and track peak concurrency
///
/// # Example
///
/// ```rust,ignore
/// let processor = MockStageProcessor::new();
///
/// // First two attempts fail, the third succeeds
/// processor.push_outcome(Err(ProcessError::Transient("flaky".into()))).await;
/// processor.push_outcome(Err(ProcessError::Transient("flaky".into()))).await;
/// processor.push_outcome(Ok("photos/1.jpg".into())).await;
///
/// // Later: assert how it was called
/// assert_eq!(processor.call_count().await, 3);
/// ```
#[derive(Clone)]
pub struct MockStageProcessor {
    calls: Arc<RwLock<Vec<RecordedProcess>>>,
    outcomes: Arc<RwLock<VecDeque<Result<String, ProcessError>>>>,
    handler: Arc<RwLock<Option<ProcessHandler>>>,
    process_duration: Arc<RwLock<Duration>>,
    inflight: Arc<AtomicUsize>,
    max_inflight: Arc<AtomicUsize>,
}

impl Default for MockStageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStageProcessor {
    /// Create a new mock processor that succeeds by default.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            outcomes: Arc::new(RwLock::new(VecDeque::new())),
            handler: Arc::new(RwLock::new(None)),
            process_duration: Arc::new(RwLock::new(Duration::ZERO)),
            inflight: Arc::new(AtomicUsize::new(0)),
            max_inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue an outcome; queued outcomes are consumed in order before the
    /// default success behavior kicks back in.
    pub async fn push_outcome(&self, outcome: Result<String, ProcessError>) {
        self.outcomes.write().await.push_back(outcome);
    }

    /// Install a handler deciding the outcome per invocation. Takes
    /// precedence over queued outcomes.
    pub async fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str) -> Result<String, ProcessError> + Send + Sync + 'static,
    {
        *self.handler.write().await = Some(Box::new(handler));
    }

    /// Simulate slow processing.
    pub async fn set_process_duration(&self, duration: Duration) {
        *self.process_duration.write().await = duration;
    }

    /// All recorded invocations.
    pub async fn recorded_calls(&self) -> Vec<RecordedProcess> {
        self.calls.read().await.clone()
    }

    /// Total invocation count.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Invocation count for one job.
    pub async fn call_count_for(&self, job_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.job_id == job_id)
            .count()
    }

    /// Highest number of concurrent invocations observed.
    pub fn max_observed_inflight(&self) -> usize {
        self.max_inflight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageProcessor for MockStageProcessor {
    async fn process(&self, job_id: &str, payload_ref: &str) -> Result<String, ProcessError> {
        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight.fetch_max(current, Ordering::SeqCst);

        let duration = *self.process_duration.read().await;
        if duration > Duration::ZERO {
            tokio::time::sleep(duration).await;
        }

        self.calls.write().await.push(RecordedProcess {
            job_id: job_id.to_string(),
            payload_ref: payload_ref.to_string(),
            timestamp: Utc::now(),
        });

        let result = {
            let handler = self.handler.read().await;
            if let Some(handler) = handler.as_ref() {
                handler(job_id, payload_ref)
            } else if let Some(outcome) = self.outcomes.write().await.pop_front() {
                outcome
            } else {
                Ok(format!("artifact/{}", job_id))
            }
        };

        self.inflight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
