//! Job storage trait and types.

use thiserror::Error;

use crate::job::{JobEnvelope, JobStage, Stage, WorkerClass};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Compare-and-swap guard did not match the current stage. The caller
    /// lost a race; the update was not applied.
    #[error("stage conflict on job {job_id}: expected {expected}, found {actual}")]
    Conflict {
        job_id: String,
        expected: String,
        actual: String,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Opaque reference to the source media.
    pub payload_ref: String,
    /// Requested execution affinity.
    pub worker_class_hint: WorkerClass,
    /// Per-stage attempt bound.
    pub max_attempts: u32,
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by stage type (e.g. "capture_queued").
    pub stage: Option<String>,
    /// Filter by worker class hint.
    pub worker_class: Option<WorkerClass>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            stage: None,
            worker_class: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by stage type.
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Filter by worker class hint.
    pub fn with_worker_class(mut self, class: WorkerClass) -> Self {
        self.worker_class = Some(class);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// `transition` and `claim` are the only mutation paths for `stage` and both
/// are compare-and-swap guarded: concurrent callers racing on the same job
/// converge because exactly one guard matches.
pub trait JobStore: Send + Sync {
    /// Create a new job in the `Pending` stage.
    fn create(&self, request: CreateJobRequest) -> Result<JobEnvelope, StoreError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<JobEnvelope>, StoreError>;

    /// List jobs matching the filter, oldest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<JobEnvelope>, StoreError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, StoreError>;

    /// Compare-and-swap the job's stage. `expected` is the stage type the
    /// caller believes is current; on mismatch the update is not applied and
    /// `StoreError::Conflict` is returned.
    fn transition(
        &self,
        id: &str,
        expected: &str,
        new_stage: JobStage,
    ) -> Result<JobEnvelope, StoreError>;

    /// Claim a queued job for execution: CAS from the stage's queued state
    /// into its running state, incrementing the stage's attempt counter.
    fn claim(
        &self,
        id: &str,
        stage: Stage,
        claimed_by: &str,
    ) -> Result<JobEnvelope, StoreError>;

    /// Record the failure of the current attempt (stores `last_error`).
    fn record_attempt_failure(
        &self,
        id: &str,
        stage: Stage,
        error: &str,
    ) -> Result<JobEnvelope, StoreError>;

    /// Fold any `*Running` job back to its `*Queued` stage. Called once on
    /// startup, before any executor is live, so every running claim is known
    /// to be orphaned. Returns the requeued envelopes for republishing.
    fn requeue_orphaned(&self) -> Result<Vec<JobEnvelope>, StoreError>;

    /// Permanently delete a job. Returns the deleted envelope if found.
    fn delete(&self, id: &str) -> Result<JobEnvelope, StoreError>;
}
