//! Pipeline coordinator implementation.
//!
//! Owns every stage-transition decision: jobs enter through `submit`, worker
//! pools report attempt outcomes back through [`StageOutcomeHandler`], and
//! the coordinator advances, retries or dead-letters each job. Two
//! background loops supplement the reactive path:
//! - schedule loop: submits capture jobs for configured sources on an interval
//! - sweep loop: republishes queued jobs whose broker message went missing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::job::{
    CreateJobRequest, JobEnvelope, JobFilter, JobStage, JobStore, Stage, StoreError, WorkerClass,
};
use crate::metrics;
use crate::sink::{JobNotification, JobOutcome, ResultSink};
use crate::worker::{ProcessError, StageOutcomeHandler};

use super::config::{CoordinatorConfig, RetryPolicy};
use super::types::{CoordinatorError, CoordinatorStatus};

/// The pipeline coordinator - drives jobs from capture to detection to a
/// terminal state.
pub struct PipelineCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    sink: Arc<dyn ResultSink>,
    retry: RetryPolicy,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PipelineCoordinator {
    /// Create a new coordinator.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let retry = config.retry_policy();

        Self {
            config,
            store,
            broker,
            sink,
            retry,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Start the coordinator: recover persisted work, then spawn the
    /// schedule and sweep loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("coordinator already running");
            return;
        }

        info!("starting pipeline coordinator");

        self.recover().await;
        self.spawn_schedule_loop();
        self.spawn_sweep_loop();

        info!("pipeline coordinator started");
    }

    /// Stop the coordinator gracefully.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("coordinator not running");
            return;
        }

        info!("stopping pipeline coordinator");
        let _ = self.shutdown_tx.send(());

        // Give loops a moment to observe the signal
        tokio::time::sleep(Duration::from_millis(200)).await;

        info!("pipeline coordinator stopped");
    }

    /// Capture trigger intake: create a job and enqueue it for capture.
    ///
    /// On broker failure the job is left `Pending` and the error is
    /// surfaced; the caller owns the resubmission.
    pub async fn submit(
        &self,
        payload_ref: impl Into<String>,
        worker_class_hint: WorkerClass,
    ) -> Result<String, CoordinatorError> {
        Self::submit_job(
            &self.store,
            &self.broker,
            self.config.max_attempts,
            payload_ref.into(),
            worker_class_hint,
        )
        .await
    }

    /// Get a job by ID.
    pub fn get_job(&self, id: &str) -> Result<Option<JobEnvelope>, CoordinatorError> {
        Ok(self.store.get(id)?)
    }

    /// Current coordinator status with per-stage counts.
    pub fn status(&self) -> CoordinatorStatus {
        let count = |stage: &str| {
            self.store
                .count(&JobFilter::new().with_stage(stage))
                .unwrap_or(0) as usize
        };

        CoordinatorStatus {
            running: self.running.load(Ordering::Relaxed),
            pending: count("pending"),
            capture_queued: count("capture_queued"),
            capture_running: count("capture_running"),
            detection_queued: count("detection_queued"),
            detection_running: count("detection_running"),
            succeeded: count("succeeded"),
            dead_lettered: count("dead_lettered"),
        }
    }

    /// Fold orphaned running jobs back to queued and republish everything
    /// that should have a broker message. Runs before any executor is live.
    async fn recover(&self) {
        match self.store.requeue_orphaned() {
            Ok(requeued) if !requeued.is_empty() => {
                info!("requeued {} orphaned running jobs", requeued.len());
            }
            Ok(_) => {}
            Err(e) => {
                error!("failed to requeue orphaned jobs: {}", e);
            }
        }

        // The in-memory broker starts empty, so every queued job needs its
        // message re-issued.
        for stage_type in ["capture_queued", "detection_queued"] {
            let mut offset = 0i64;
            loop {
                let filter = JobFilter::new()
                    .with_stage(stage_type)
                    .with_limit(100)
                    .with_offset(offset);

                let jobs = match self.store.list(&filter) {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        error!("failed to list {} jobs for recovery: {}", stage_type, e);
                        break;
                    }
                };

                let page_len = jobs.len();
                for job in &jobs {
                    if let Err(e) = Self::publish_for(&self.broker, job).await {
                        metrics::PUBLISH_FAILURES.inc();
                        warn!(job_id = %job.id, "recovery publish failed: {}", e);
                    }
                }

                if page_len < 100 {
                    break;
                }
                offset += page_len as i64;
            }
        }
    }

    /// Spawn the interval capture-schedule loop.
    fn spawn_schedule_loop(&self) {
        let schedule = self.config.schedule.clone();
        if !schedule.enabled || schedule.sources.is_empty() {
            return;
        }

        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let broker = Arc::clone(&self.broker);
        let max_attempts = self.config.max_attempts;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(
                sources = schedule.sources.len(),
                interval_secs = schedule.interval_secs,
                "capture schedule loop started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("capture schedule loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(schedule.interval_secs)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }

                        let mut submitted = 0usize;
                        for source in &schedule.sources {
                            match Self::submit_job(
                                &store,
                                &broker,
                                max_attempts,
                                source.payload_ref.clone(),
                                source.worker_class,
                            )
                            .await
                            {
                                Ok(_) => submitted += 1,
                                Err(e) => {
                                    warn!(payload = %source.payload_ref, "scheduled capture failed: {}", e);
                                }
                            }
                        }
                        info!("scheduled {} capture jobs", submitted);
                    }
                }
            }
            info!("capture schedule loop stopped");
        });
    }

    /// Spawn the sweep loop that rescues stranded queued jobs.
    fn spawn_sweep_loop(&self) {
        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let broker = Arc::clone(&self.broker);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(config.sweep_interval_secs)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = Self::sweep_stranded(&store, &broker, &config).await {
                            warn!("sweep error: {}", e);
                        }
                    }
                }
            }
            info!("sweep loop stopped");
        });
    }

    /// Republish queued jobs untouched for longer than the stale threshold.
    ///
    /// A duplicate message is harmless: the loser of the claim CAS discards
    /// its copy, so over-publishing converges while under-publishing would
    /// strand a job forever.
    async fn sweep_stranded(
        store: &Arc<dyn JobStore>,
        broker: &Arc<dyn Broker>,
        config: &CoordinatorConfig,
    ) -> Result<usize, CoordinatorError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(config.sweep_stale_after_secs as i64);
        let mut republished = 0usize;

        for stage_type in ["capture_queued", "detection_queued"] {
            let filter = JobFilter::new()
                .with_stage(stage_type)
                .with_limit(config.sweep_batch_limit as i64);

            for job in store.list(&filter)? {
                if job.updated_at >= cutoff {
                    continue;
                }
                match Self::publish_for(broker, &job).await {
                    Ok(()) => republished += 1,
                    Err(e) => {
                        metrics::PUBLISH_FAILURES.inc();
                        warn!(job_id = %job.id, "sweep publish failed: {}", e);
                    }
                }
            }
        }

        if republished > 0 {
            info!("sweep republished {} stranded jobs", republished);
        }
        Ok(republished)
    }

    /// Create a job and hand it to the capture queue.
    async fn submit_job(
        store: &Arc<dyn JobStore>,
        broker: &Arc<dyn Broker>,
        max_attempts: u32,
        payload_ref: String,
        worker_class_hint: WorkerClass,
    ) -> Result<String, CoordinatorError> {
        let job = store.create(CreateJobRequest {
            payload_ref,
            worker_class_hint,
            max_attempts,
        })?;
        metrics::JOBS_SUBMITTED.inc();

        store.transition(&job.id, "pending", JobStage::CaptureQueued)?;

        if let Err(e) = broker
            .publish(Stage::Capture, job.worker_class_hint, &job.id)
            .await
        {
            metrics::PUBLISH_FAILURES.inc();
            // Fold back to Pending so the caller can resubmit later.
            if let Err(revert) = store.transition(&job.id, "capture_queued", JobStage::Pending) {
                warn!(job_id = %job.id, "failed to revert unpublished job: {}", revert);
            }
            return Err(e.into());
        }

        debug!(job_id = %job.id, class = %job.worker_class_hint.as_label(), "job submitted");
        Ok(job.id)
    }

    /// Publish the broker message implied by a queued stage.
    async fn publish_for(
        broker: &Arc<dyn Broker>,
        job: &JobEnvelope,
    ) -> Result<(), BrokerError> {
        match &job.stage {
            JobStage::CaptureQueued => {
                broker
                    .publish(Stage::Capture, job.worker_class_hint, &job.id)
                    .await
            }
            JobStage::DetectionQueued { .. } => {
                broker
                    .publish(Stage::Detection, job.worker_class_hint, &job.id)
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Record a terminal stage and fire the sink notification.
    fn notify_terminal(&self, job_id: &str, final_stage: &str, outcome: JobOutcome) {
        let notification = JobNotification {
            job_id: job_id.to_string(),
            final_stage: final_stage.to_string(),
            outcome,
        };

        metrics::SINK_NOTIFICATIONS
            .with_label_values(&[notification.outcome_label()])
            .inc();

        // Fire-and-forget: job state is already durable, the sink owns its
        // own delivery retries.
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            sink.notify(notification).await;
        });
    }

    /// Schedule a delayed republish for a retry.
    fn schedule_retry(&self, job: &JobEnvelope, stage: Stage, attempt: u32) {
        let delay = self.retry.delay(attempt);
        metrics::RETRIES_SCHEDULED
            .with_label_values(&[stage.as_label()])
            .inc();

        info!(
            job_id = %job.id,
            stage = %stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );

        let broker = Arc::clone(&self.broker);
        let job_id = job.id.clone();
        let class = job.worker_class_hint;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = broker.publish(stage, class, &job_id).await {
                metrics::PUBLISH_FAILURES.inc();
                // The sweep loop picks the job up once the broker is back.
                warn!(job_id = %job_id, "retry publish failed: {}", e);
            }
        });
    }

    /// Dead-letter a job and notify the sink with a coarse reason.
    fn dead_letter(&self, job: &JobEnvelope, stage: Stage, error: &ProcessError, attempts: u32) {
        let dead = JobStage::DeadLettered {
            stage,
            error: error.to_string(),
            dead_lettered_at: Utc::now(),
        };

        match self.store.transition(&job.id, stage.running_type(), dead) {
            Ok(_) => {}
            Err(StoreError::Conflict { .. }) => {
                debug!(job_id = %job.id, "dead-letter lost a race, discarding");
                return;
            }
            Err(e) => {
                error!(job_id = %job.id, "failed to dead-letter job: {}", e);
                return;
            }
        }

        metrics::DEAD_LETTERS
            .with_label_values(&[stage.as_label()])
            .inc();
        warn!(job_id = %job.id, stage = %stage, attempts, "job dead-lettered");

        // Coarse classification only; internal error detail stays internal.
        let (reason, unrecoverable) = if error.is_retryable() {
            (
                format!("{} failed after {} attempts", stage, attempts),
                false,
            )
        } else {
            (format!("{} input could not be processed", stage), true)
        };

        self.notify_terminal(
            &job.id,
            "dead_lettered",
            JobOutcome::Failed {
                reason,
                unrecoverable,
            },
        );
    }
}

#[async_trait]
impl StageOutcomeHandler for PipelineCoordinator {
    async fn on_success(&self, job: &JobEnvelope, stage: Stage, output_ref: &str) {
        match stage {
            Stage::Capture => {
                let done = JobStage::CaptureDone {
                    artifact_ref: output_ref.to_string(),
                    completed_at: Utc::now(),
                };
                match self.store.transition(&job.id, "capture_running", done) {
                    Ok(_) => {}
                    Err(StoreError::Conflict { .. }) => {
                        debug!(job_id = %job.id, "capture result discarded after lost race");
                        return;
                    }
                    Err(e) => {
                        error!(job_id = %job.id, "failed to record capture completion: {}", e);
                        return;
                    }
                }

                info!(job_id = %job.id, artifact = %output_ref, "capture complete");

                let queued = JobStage::DetectionQueued {
                    artifact_ref: output_ref.to_string(),
                };
                match self.store.transition(&job.id, "capture_done", queued) {
                    Ok(_) => {}
                    Err(StoreError::Conflict { .. }) => {
                        debug!(job_id = %job.id, "detection enqueue lost a race");
                        return;
                    }
                    Err(e) => {
                        error!(job_id = %job.id, "failed to enqueue detection: {}", e);
                        return;
                    }
                }

                if let Err(e) = self
                    .broker
                    .publish(Stage::Detection, job.worker_class_hint, &job.id)
                    .await
                {
                    metrics::PUBLISH_FAILURES.inc();
                    warn!(
                        job_id = %job.id,
                        "detection publish failed, sweep will republish: {}",
                        e
                    );
                }
            }
            Stage::Detection => {
                let succeeded = JobStage::Succeeded {
                    result_ref: output_ref.to_string(),
                    completed_at: Utc::now(),
                };
                match self.store.transition(&job.id, "detection_running", succeeded) {
                    Ok(_) => {}
                    Err(StoreError::Conflict { .. }) => {
                        debug!(job_id = %job.id, "detection result discarded after lost race");
                        return;
                    }
                    Err(e) => {
                        error!(job_id = %job.id, "failed to record detection completion: {}", e);
                        return;
                    }
                }

                metrics::JOBS_SUCCEEDED.inc();
                info!(job_id = %job.id, result = %output_ref, "job succeeded");

                self.notify_terminal(
                    &job.id,
                    "succeeded",
                    JobOutcome::Succeeded {
                        result_ref: output_ref.to_string(),
                    },
                );
            }
        }
    }

    async fn on_failure(&self, job: &JobEnvelope, stage: Stage, error: &ProcessError) {
        let envelope = match self
            .store
            .record_attempt_failure(&job.id, stage, &error.to_string())
        {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(job_id = %job.id, "failed to record attempt failure: {}", e);
                return;
            }
        };

        let attempts = envelope.attempts_for(stage);

        if !error.is_retryable() || attempts >= envelope.max_attempts {
            self.dead_letter(&envelope, stage, error, attempts);
            return;
        }

        // Fold back to queued for the next attempt.
        let queued = match stage {
            Stage::Capture => JobStage::CaptureQueued,
            Stage::Detection => JobStage::DetectionQueued {
                artifact_ref: envelope
                    .stage
                    .artifact_ref()
                    .unwrap_or(&envelope.payload_ref)
                    .to_string(),
            },
        };

        match self.store.transition(&envelope.id, stage.running_type(), queued) {
            Ok(_) => {}
            Err(StoreError::Conflict { .. }) => {
                debug!(job_id = %envelope.id, "retry requeue lost a race, discarding");
                return;
            }
            Err(e) => {
                error!(job_id = %envelope.id, "failed to requeue for retry: {}", e);
                return;
            }
        }

        self.schedule_retry(&envelope, stage, attempts);
    }
}
