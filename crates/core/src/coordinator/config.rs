//! Coordinator configuration and retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::WorkerClass;

/// Configuration for the pipeline coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Per-stage attempt bound before a job dead-letters.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay in seconds (doubles per attempt).
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Ceiling on the retry delay in seconds.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,

    /// How often the sweep loop looks for stranded queued jobs (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// A queued job untouched for this long is republished by the sweep
    /// (seconds). Must comfortably exceed the backoff cap so scheduled
    /// retries are not double-published.
    #[serde(default = "default_sweep_stale_after")]
    pub sweep_stale_after_secs: u64,

    /// How many stranded jobs one sweep tick may republish.
    #[serde(default = "default_sweep_batch_limit")]
    pub sweep_batch_limit: usize,

    /// Interval-driven capture submission.
    #[serde(default)]
    pub schedule: CaptureScheduleConfig,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    2
}

fn default_backoff_cap() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_sweep_stale_after() -> u64 {
    180
}

fn default_sweep_batch_limit() -> usize {
    100
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_stale_after_secs: default_sweep_stale_after(),
            sweep_batch_limit: default_sweep_batch_limit(),
            schedule: CaptureScheduleConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Retry policy derived from the backoff settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_secs(self.backoff_base_secs),
            cap: Duration::from_secs(self.backoff_cap_secs),
        }
    }
}

/// Periodic capture submission for a fixed set of sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureScheduleConfig {
    /// Enable/disable the schedule loop. When disabled, jobs are only
    /// created through explicit submission.
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between capture rounds.
    #[serde(default = "default_schedule_interval")]
    pub interval_secs: u64,

    /// Sources captured every round.
    #[serde(default)]
    pub sources: Vec<CaptureSource>,
}

fn default_schedule_interval() -> u64 {
    300
}

impl Default for CaptureScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_schedule_interval(),
            sources: Vec::new(),
        }
    }
}

/// One scheduled capture source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSource {
    /// Opaque reference handed to the capture stage (e.g. a stream URL).
    pub payload_ref: String,

    /// Execution affinity for jobs from this source.
    #[serde(default)]
    pub worker_class: WorkerClass,
}

/// Exponential backoff with jitter, attempt-bounded by the caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    /// Create a policy with explicit base and cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (1-indexed: the delay scheduled
    /// after the attempt that just failed). Jitter keeps simultaneous
    /// failures from retrying in lockstep; the result is always within
    /// [half, full] of the capped exponential value.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let uncapped = self.base.saturating_mul(1u32 << exponent);
        let capped = uncapped.min(self.cap);

        let fraction = 0.5 + 0.5 * jitter_fraction();
        capped.mul_f64(fraction)
    }
}

/// Uniform value in [0, 1) drawn from UUID randomness.
fn jitter_fraction() -> f64 {
    let bits = uuid::Uuid::new_v4().as_u128() as u64;
    (bits >> 11) as f64 / (1u64 << 53) as f64
}
