//! Worker pool implementation.
//!
//! A pool runs `concurrency_limit` executors against one (stage, hardware
//! class) broker partition. Executors pull deliveries one at a time, so the
//! pool never holds more claims than it has executors: unclaimed messages
//! stay queued at the broker and provide natural backpressure.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::job::{JobStore, Stage, StoreError};
use crate::metrics;

use super::config::PoolConfig;
use super::traits::{ProcessError, StageOutcomeHandler, StageProcessor};
use super::types::PoolStatus;

/// A pool of concurrent executors serving one pipeline stage.
pub struct WorkerPool {
    config: PoolConfig,
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    processor: Arc<dyn StageProcessor>,
    outcomes: Arc<dyn StageOutcomeHandler>,

    // Runtime state
    running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    total_processed: Arc<AtomicU64>,
    total_failed: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
        processor: Arc<dyn StageProcessor>,
        outcomes: Arc<dyn StageOutcomeHandler>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            store,
            broker,
            processor,
            outcomes,
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            total_processed: Arc::new(AtomicU64::new(0)),
            total_failed: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the pool's executors.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(pool = %self.config.pool_id, "worker pool already running");
            return;
        }

        info!(
            pool = %self.config.pool_id,
            stage = %self.config.stage,
            class = %self.config.hardware_class,
            concurrency = self.config.concurrency_limit,
            "starting worker pool"
        );

        let mut handles = self.handles.lock().await;
        for slot in 0..self.config.concurrency_limit {
            let config = self.config.clone();
            let store = Arc::clone(&self.store);
            let broker = Arc::clone(&self.broker);
            let processor = Arc::clone(&self.processor);
            let outcomes = Arc::clone(&self.outcomes);
            let running = Arc::clone(&self.running);
            let active = Arc::clone(&self.active);
            let total_processed = Arc::clone(&self.total_processed);
            let total_failed = Arc::clone(&self.total_failed);
            let shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                Self::executor_loop(
                    slot,
                    config,
                    store,
                    broker,
                    processor,
                    outcomes,
                    running,
                    active,
                    total_processed,
                    total_failed,
                    shutdown_rx,
                )
                .await;
            }));
        }
    }

    /// Stop dequeuing and wait for in-flight executors to finish, up to the
    /// configured grace period. Stragglers keep running.
    pub async fn drain(&self) {
        self.shutdown(false).await;
    }

    /// Drain, then abort any executor still running past the grace period.
    pub async fn stop(&self) {
        self.shutdown(true).await;
    }

    async fn shutdown(&self, abort_stragglers: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(pool = %self.config.pool_id, "worker pool not running");
            return;
        }

        info!(pool = %self.config.pool_id, "stopping worker pool");
        let _ = self.shutdown_tx.send(());

        let grace = Duration::from_secs(self.config.drain_grace_secs);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!(
                    pool = %self.config.pool_id,
                    "executor did not finish within grace period"
                );
                if abort_stragglers {
                    abort.abort();
                }
            }
        }

        info!(pool = %self.config.pool_id, "worker pool stopped");
    }

    /// Current pool status.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            pool_id: self.config.pool_id.clone(),
            stage: self.config.stage,
            hardware_class: self.config.hardware_class,
            running: self.running.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            concurrency_limit: self.config.concurrency_limit,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn executor_loop(
        slot: usize,
        config: PoolConfig,
        store: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
        processor: Arc<dyn StageProcessor>,
        outcomes: Arc<dyn StageOutcomeHandler>,
        running: Arc<AtomicBool>,
        active: Arc<AtomicUsize>,
        total_processed: Arc<AtomicU64>,
        total_failed: Arc<AtomicU64>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let executor_id = format!("{}/{}", config.pool_id, slot);

        let mut subscription = match broker.subscribe(config.stage, config.hardware_class).await {
            Ok(sub) => sub,
            Err(e) => {
                error!(executor = %executor_id, "failed to subscribe: {}", e);
                return;
            }
        };

        debug!(executor = %executor_id, "executor started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown_rx.recv() => break,
                maybe = subscription.recv() => match maybe {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            if !running.load(Ordering::Relaxed) {
                // Shutting down; hand the message back untouched.
                let _ = broker.nack(&delivery.handle, true).await;
                break;
            }

            active.fetch_add(1, Ordering::SeqCst);
            metrics::POOL_ACTIVE
                .with_label_values(&[config.pool_id.as_str()])
                .inc();

            let succeeded = Self::handle_delivery(
                &delivery,
                &executor_id,
                &config,
                &store,
                &broker,
                &processor,
                &outcomes,
            )
            .await;

            match succeeded {
                Some(true) => {
                    total_processed.fetch_add(1, Ordering::Relaxed);
                }
                Some(false) => {
                    total_failed.fetch_add(1, Ordering::Relaxed);
                }
                None => {} // discarded without an attempt
            }

            active.fetch_sub(1, Ordering::SeqCst);
            metrics::POOL_ACTIVE
                .with_label_values(&[config.pool_id.as_str()])
                .dec();
        }

        debug!(executor = %executor_id, "executor stopped");
    }

    /// Handle one delivery. Returns Some(true) for a successful attempt,
    /// Some(false) for a failed attempt, None when the delivery was
    /// discarded without starting an attempt.
    async fn handle_delivery(
        delivery: &Delivery,
        executor_id: &str,
        config: &PoolConfig,
        store: &Arc<dyn JobStore>,
        broker: &Arc<dyn Broker>,
        processor: &Arc<dyn StageProcessor>,
        outcomes: &Arc<dyn StageOutcomeHandler>,
    ) -> Option<bool> {
        let job = match store.get(&delivery.job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %delivery.job_id, "delivery for unknown job, discarding");
                let _ = broker.ack(&delivery.handle).await;
                return None;
            }
            Err(e) => {
                warn!(job_id = %delivery.job_id, "failed to load job: {}", e);
                let _ = broker.nack(&delivery.handle, true).await;
                return None;
            }
        };

        // Guard against stale redeliveries: if the job already advanced past
        // the queued state this message implies, the message is obsolete.
        if job.stage.stage_type() != config.stage.queued_type() {
            debug!(
                job_id = %job.id,
                stage = job.stage.stage_type(),
                "stale delivery, discarding"
            );
            let _ = broker.ack(&delivery.handle).await;
            return None;
        }

        // The capture stage reads the original payload; detection reads the
        // artifact the capture stage produced.
        let payload = match config.stage {
            Stage::Capture => job.payload_ref.clone(),
            Stage::Detection => match job.stage.artifact_ref() {
                Some(artifact) => artifact.to_string(),
                None => job.payload_ref.clone(),
            },
        };

        let claimed = match store.claim(&delivery.job_id, config.stage, executor_id) {
            Ok(job) => job,
            Err(StoreError::Conflict { .. }) => {
                // A concurrent executor won the claim; this copy is obsolete.
                debug!(job_id = %delivery.job_id, "lost claim race, discarding");
                let _ = broker.ack(&delivery.handle).await;
                return None;
            }
            Err(e) => {
                warn!(job_id = %delivery.job_id, "failed to claim job: {}", e);
                let _ = broker.nack(&delivery.handle, true).await;
                return None;
            }
        };

        debug!(
            job_id = %claimed.id,
            executor = %executor_id,
            attempt = claimed.attempts_for(config.stage),
            "processing"
        );

        let timeout = Duration::from_secs(config.process_timeout_secs);
        let started = Instant::now();

        let result = match tokio::time::timeout(
            timeout,
            processor.process(&claimed.id, &payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProcessError::Transient(format!(
                "stage processing timed out after {}s",
                config.process_timeout_secs
            ))),
        };

        metrics::STAGE_DURATION
            .with_label_values(&[config.stage.as_label()])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(output_ref) => {
                metrics::STAGE_ATTEMPTS
                    .with_label_values(&[config.stage.as_label(), "success"])
                    .inc();
                outcomes.on_success(&claimed, config.stage, &output_ref).await;
                let _ = broker.ack(&delivery.handle).await;
                Some(true)
            }
            Err(err) => {
                let result_label = if err.is_retryable() {
                    "transient_error"
                } else {
                    "permanent_error"
                };
                metrics::STAGE_ATTEMPTS
                    .with_label_values(&[config.stage.as_label(), result_label])
                    .inc();
                outcomes.on_failure(&claimed, config.stage, &err).await;
                // The outcome handler owns retry scheduling; this delivery
                // is done either way.
                let _ = broker.ack(&delivery.handle).await;
                Some(false)
            }
        }
    }
}
