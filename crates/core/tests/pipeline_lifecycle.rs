//! Pipeline lifecycle integration tests.
//!
//! These tests drive jobs through the full pipeline with mock stage
//! processors: submit -> capture_queued -> capture_running -> capture_done
//! -> detection_queued -> detection_running -> terminal.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use watchpost_core::{
    testing::{MockSink, MockStageProcessor},
    Broker, CoordinatorConfig, HardwareClass, JobOutcome, JobStage, JobStore, MemoryBroker,
    PipelineCoordinator, PoolConfig, ProcessError, SqliteJobStore, Stage, StageOutcomeHandler,
    WorkerClass, WorkerPool,
};

/// Test helper wiring a store, broker, coordinator and both stage pools.
struct TestHarness {
    store: Arc<SqliteJobStore>,
    broker: MemoryBroker,
    capture_processor: MockStageProcessor,
    detection_processor: MockStageProcessor,
    sink: MockSink,
    coordinator: Arc<PipelineCoordinator>,
    capture_pool: WorkerPool,
    detection_pool: WorkerPool,
    _temp_dir: TempDir,
}

struct HarnessOptions {
    max_attempts: u32,
    capture_concurrency: usize,
    detection_concurrency: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            capture_concurrency: 2,
            detection_concurrency: 2,
        }
    }
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    async fn with_options(options: HarnessOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let store = Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let broker = MemoryBroker::new(Duration::from_secs(30));
        let capture_processor = MockStageProcessor::new();
        let detection_processor = MockStageProcessor::new();
        let sink = MockSink::new();

        let config = CoordinatorConfig {
            max_attempts: options.max_attempts,
            // Immediate retries keep the tests fast.
            backoff_base_secs: 0,
            backoff_cap_secs: 1,
            ..Default::default()
        };

        let coordinator = Arc::new(PipelineCoordinator::new(
            config,
            Arc::clone(&store) as Arc<dyn watchpost_core::JobStore>,
            Arc::new(broker.clone()),
            Arc::new(sink.clone()),
        ));

        let handler: Arc<dyn StageOutcomeHandler> = Arc::clone(&coordinator) as _;

        let capture_pool = WorkerPool::new(
            PoolConfig::new(Stage::Capture, HardwareClass::Cpu)
                .with_concurrency_limit(options.capture_concurrency)
                .with_process_timeout_secs(5),
            Arc::clone(&store) as _,
            Arc::new(broker.clone()),
            Arc::new(capture_processor.clone()),
            Arc::clone(&handler),
        );

        let detection_pool = WorkerPool::new(
            PoolConfig::new(Stage::Detection, HardwareClass::Cpu)
                .with_concurrency_limit(options.detection_concurrency)
                .with_process_timeout_secs(5),
            Arc::clone(&store) as _,
            Arc::new(broker.clone()),
            Arc::new(detection_processor.clone()),
            handler,
        );

        Self {
            store,
            broker,
            capture_processor,
            detection_processor,
            sink,
            coordinator,
            capture_pool,
            detection_pool,
            _temp_dir: temp_dir,
        }
    }

    async fn start(&self) {
        self.coordinator.start().await;
        self.capture_pool.start().await;
        self.detection_pool.start().await;
    }

    async fn stop(&self) {
        self.capture_pool.stop().await;
        self.detection_pool.stop().await;
        self.coordinator.stop().await;
    }

    fn stage_of(&self, job_id: &str) -> Option<String> {
        self.store
            .get(job_id)
            .ok()
            .flatten()
            .map(|j| j.stage.stage_type().to_string())
    }

    async fn wait_for_stage(&self, job_id: &str, expected: &str, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        while start.elapsed() < timeout {
            if let Some(stage) = self.stage_of(job_id) {
                if stage == expected {
                    return true;
                }
                // Stop early if a different terminal state was reached.
                if matches!(stage.as_str(), "succeeded" | "failed" | "dead_lettered")
                    && stage != expected
                {
                    return false;
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
        false
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_job_flows_from_capture_to_detection_to_succeeded() {
    let harness = TestHarness::new().await;
    harness
        .capture_processor
        .set_handler(|job_id, _| Ok(format!("photos/{}.jpg", job_id)))
        .await;
    harness
        .detection_processor
        .set_handler(|job_id, _| Ok(format!("results/{}.json", job_id)))
        .await;

    harness.start().await;

    let job_id = harness
        .coordinator
        .submit("rtsp://camera-1/stream", WorkerClass::Any)
        .await
        .expect("submit failed");

    // Sample observed stages while the job runs; the sampled sequence must
    // follow the pipeline order.
    let watcher = {
        let store = Arc::clone(&harness.store);
        let job_id = job_id.clone();
        tokio::spawn(async move {
            let mut observed: Vec<u8> = Vec::new();
            loop {
                if let Ok(Some(job)) = store.get(&job_id) {
                    observed.push(job.stage.order_index());
                    if job.stage.is_terminal() {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            observed
        })
    };

    let reached = harness
        .wait_for_stage(&job_id, "succeeded", Duration::from_secs(5))
        .await;
    assert!(reached, "job should reach succeeded");

    let observed = watcher.await.unwrap();
    let mut sorted = observed.clone();
    sorted.sort_unstable();
    assert_eq!(observed, sorted, "observed stages out of pipeline order");

    // Capture saw the original payload, detection saw the capture artifact.
    let capture_calls = harness.capture_processor.recorded_calls().await;
    assert_eq!(capture_calls.len(), 1);
    assert_eq!(capture_calls[0].payload_ref, "rtsp://camera-1/stream");

    let detection_calls = harness.detection_processor.recorded_calls().await;
    assert_eq!(detection_calls.len(), 1);
    assert_eq!(
        detection_calls[0].payload_ref,
        format!("photos/{}.jpg", job_id)
    );

    let job = harness.store.get(&job_id).unwrap().unwrap();
    match &job.stage {
        JobStage::Succeeded { result_ref, .. } => {
            assert_eq!(result_ref, &format!("results/{}.json", job_id));
        }
        other => panic!("expected succeeded, got {:?}", other),
    }
    assert_eq!(job.capture_attempts, 1);
    assert_eq!(job.detection_attempts, 1);

    // Exactly one terminal notification.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let notifications = harness.sink.notifications_for(&job_id).await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].outcome,
        JobOutcome::Succeeded {
            result_ref: format!("results/{}.json", job_id)
        }
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_detection_transient_failures_then_success() {
    let harness = TestHarness::new().await;
    harness
        .detection_processor
        .push_outcome(Err(ProcessError::Transient("model busy".to_string())))
        .await;
    harness
        .detection_processor
        .push_outcome(Err(ProcessError::Transient("model busy".to_string())))
        .await;

    harness.start().await;

    let job_id = harness
        .coordinator
        .submit("rtsp://camera-1/stream", WorkerClass::Any)
        .await
        .unwrap();

    let reached = harness
        .wait_for_stage(&job_id, "succeeded", Duration::from_secs(5))
        .await;
    assert!(reached, "job should succeed on the third detection attempt");

    let job = harness.store.get(&job_id).unwrap().unwrap();
    assert_eq!(job.detection_attempts, 3);
    assert_eq!(job.capture_attempts, 1);
    assert_eq!(harness.detection_processor.call_count_for(&job_id).await, 3);

    harness.stop().await;
}

#[tokio::test]
async fn test_always_transient_ends_dead_lettered_after_max_attempts() {
    let harness = TestHarness::with_options(HarnessOptions {
        max_attempts: 3,
        ..Default::default()
    })
    .await;
    harness
        .detection_processor
        .set_handler(|_, _| Err(ProcessError::Transient("model down".to_string())))
        .await;

    harness.start().await;

    let job_id = harness
        .coordinator
        .submit("rtsp://camera-1/stream", WorkerClass::Any)
        .await
        .unwrap();

    let reached = harness
        .wait_for_stage(&job_id, "dead_lettered", Duration::from_secs(5))
        .await;
    assert!(reached, "job should dead-letter after exhausting attempts");

    let job = harness.store.get(&job_id).unwrap().unwrap();
    assert_eq!(job.detection_attempts, 3, "exactly max_attempts attempts");
    assert_eq!(harness.detection_processor.call_count_for(&job_id).await, 3);

    // Give the scheduler a beat: no further attempts may happen.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.detection_processor.call_count_for(&job_id).await, 3);

    let notifications = harness.sink.notifications_for(&job_id).await;
    assert_eq!(notifications.len(), 1);
    match &notifications[0].outcome {
        JobOutcome::Failed {
            unrecoverable,
            reason,
        } => {
            assert!(!unrecoverable);
            assert!(reason.contains("detection"));
        }
        other => panic!("expected failure outcome, got {:?}", other),
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_permanent_input_error_dead_letters_after_one_attempt() {
    let harness = TestHarness::new().await;
    harness
        .capture_processor
        .set_handler(|_, _| Err(ProcessError::PermanentInput("bad stream url".to_string())))
        .await;

    harness.start().await;

    let job_id = harness
        .coordinator
        .submit("not-a-valid-source", WorkerClass::Any)
        .await
        .unwrap();

    let reached = harness
        .wait_for_stage(&job_id, "dead_lettered", Duration::from_secs(5))
        .await;
    assert!(reached, "permanent input errors must not be retried");

    let job = harness.store.get(&job_id).unwrap().unwrap();
    assert_eq!(job.capture_attempts, 1);
    assert_eq!(harness.capture_processor.call_count_for(&job_id).await, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let notifications = harness.sink.notifications_for(&job_id).await;
    assert_eq!(notifications.len(), 1);
    match &notifications[0].outcome {
        JobOutcome::Failed { unrecoverable, .. } => assert!(unrecoverable),
        other => panic!("expected failure outcome, got {:?}", other),
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_duplicate_delivery_is_discarded() {
    let harness = TestHarness::new().await;
    harness.start().await;

    let job_id = harness
        .coordinator
        .submit("rtsp://camera-1/stream", WorkerClass::Any)
        .await
        .unwrap();

    let reached = harness
        .wait_for_stage(&job_id, "succeeded", Duration::from_secs(5))
        .await;
    assert!(reached);
    assert_eq!(harness.capture_processor.call_count_for(&job_id).await, 1);

    // Simulate a broker redelivery of the already-completed job.
    harness
        .broker
        .publish(Stage::Capture, WorkerClass::Any, &job_id)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    // The stale copy is discarded: no second attempt, state unchanged,
    // no duplicate notification.
    assert_eq!(harness.capture_processor.call_count_for(&job_id).await, 1);
    assert_eq!(harness.stage_of(&job_id).as_deref(), Some("succeeded"));
    assert_eq!(harness.sink.notifications_for(&job_id).await.len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_submit_fails_while_broker_unavailable() {
    let harness = TestHarness::new().await;
    harness.start().await;

    harness.broker.set_available(false);

    let result = harness
        .coordinator
        .submit("rtsp://camera-1/stream", WorkerClass::Any)
        .await;
    assert!(result.is_err(), "publish failure must surface to the caller");

    let status = harness.coordinator.status();
    assert_eq!(status.pending, 1, "job stays pending for caller retry");
    assert_eq!(status.capture_queued, 0);

    // Once the broker is back a fresh submission goes through.
    harness.broker.set_available(true);
    let job_id = harness
        .coordinator
        .submit("rtsp://camera-1/stream", WorkerClass::Any)
        .await
        .unwrap();
    let reached = harness
        .wait_for_stage(&job_id, "succeeded", Duration::from_secs(5))
        .await;
    assert!(reached);

    harness.stop().await;
}

#[tokio::test]
async fn test_restart_recovers_queued_and_running_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    // First process lifetime: park one job mid-capture and one queued.
    {
        let store = SqliteJobStore::new(&db_path).unwrap();
        let running = store
            .create(watchpost_core::testing::fixtures::job_request(
                "rtsp://camera-1/stream",
            ))
            .unwrap();
        store
            .transition(&running.id, "pending", JobStage::CaptureQueued)
            .unwrap();
        store.claim(&running.id, Stage::Capture, "capture-cpu/0").unwrap();

        let queued = store
            .create(watchpost_core::testing::fixtures::job_request(
                "rtsp://camera-2/stream",
            ))
            .unwrap();
        store
            .transition(&queued.id, "pending", JobStage::CaptureQueued)
            .unwrap();
    }

    // Second process lifetime: a fresh coordinator over the same database
    // must requeue the orphan and republish both jobs.
    let store = Arc::new(SqliteJobStore::new(&db_path).unwrap());
    let broker = MemoryBroker::new(Duration::from_secs(30));
    let sink = MockSink::new();
    let coordinator = Arc::new(PipelineCoordinator::new(
        CoordinatorConfig {
            backoff_base_secs: 0,
            backoff_cap_secs: 1,
            ..Default::default()
        },
        Arc::clone(&store) as _,
        Arc::new(broker.clone()),
        Arc::new(sink.clone()),
    ));
    let handler: Arc<dyn StageOutcomeHandler> = Arc::clone(&coordinator) as _;

    let capture_processor = MockStageProcessor::new();
    let detection_processor = MockStageProcessor::new();

    let capture_pool = WorkerPool::new(
        PoolConfig::new(Stage::Capture, HardwareClass::Cpu),
        Arc::clone(&store) as _,
        Arc::new(broker.clone()),
        Arc::new(capture_processor.clone()),
        Arc::clone(&handler),
    );
    let detection_pool = WorkerPool::new(
        PoolConfig::new(Stage::Detection, HardwareClass::Cpu),
        Arc::clone(&store) as _,
        Arc::new(broker.clone()),
        Arc::new(detection_processor.clone()),
        handler,
    );

    coordinator.start().await;
    capture_pool.start().await;
    detection_pool.start().await;

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = coordinator.status();
        if status.succeeded == 2 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "both recovered jobs should complete, status: {:?}",
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    capture_pool.stop().await;
    detection_pool.stop().await;
    coordinator.stop().await;
}
