//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Coordinator (submissions, retries, dead-letters, terminal outcomes)
//! - Worker pools (attempts, processing duration, active executors)
//! - Broker and result sink interactions

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Coordinator Metrics
// =============================================================================

/// Jobs accepted through the capture trigger intake.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("watchpost_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Jobs that reached the Succeeded stage.
pub static JOBS_SUCCEEDED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "watchpost_jobs_succeeded_total",
        "Total jobs completed successfully",
    )
    .unwrap()
});

/// Retries scheduled by stage.
pub static RETRIES_SCHEDULED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "watchpost_retries_scheduled_total",
            "Total retries scheduled",
        ),
        &["stage"], // "capture", "detection"
    )
    .unwrap()
});

/// Jobs routed to the dead-letter state, by stage.
pub static DEAD_LETTERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("watchpost_dead_letters_total", "Total jobs dead-lettered"),
        &["stage"],
    )
    .unwrap()
});

/// Publish attempts that failed because the broker was unavailable.
pub static PUBLISH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "watchpost_publish_failures_total",
        "Total broker publish failures",
    )
    .unwrap()
});

// =============================================================================
// Worker Pool Metrics
// =============================================================================

/// Stage attempts by result.
pub static STAGE_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("watchpost_stage_attempts_total", "Total stage attempts"),
        &["stage", "result"], // result: "success", "transient_error", "permanent_error"
    )
    .unwrap()
});

/// Stage processing duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "watchpost_stage_duration_seconds",
            "Duration of stage processing invocations",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["stage"],
    )
    .unwrap()
});

/// Executors currently processing a claimed job, per pool.
pub static POOL_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "watchpost_pool_active_executors",
            "Executors currently processing a claimed job",
        ),
        &["pool"],
    )
    .unwrap()
});

// =============================================================================
// Result Sink Metrics
// =============================================================================

/// Sink notifications sent, by outcome.
pub static SINK_NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "watchpost_sink_notifications_total",
            "Total result sink notifications",
        ),
        &["outcome"], // "succeeded", "failed", "unrecoverable"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Coordinator
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_SUCCEEDED.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        Box::new(DEAD_LETTERS.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        // Worker pools
        Box::new(STAGE_ATTEMPTS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(POOL_ACTIVE.clone()),
        // Result sink
        Box::new(SINK_NOTIFICATIONS.clone()),
    ]
}
