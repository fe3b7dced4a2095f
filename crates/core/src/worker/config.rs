//! Worker pool configuration.

use serde::{Deserialize, Serialize};

use crate::job::{HardwareClass, Stage};

/// Configuration for one worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool identifier, used in logs, metrics and claim identities.
    pub pool_id: String,

    /// Stage this pool serves.
    pub stage: Stage,

    /// Hardware class this pool runs on.
    #[serde(default = "default_hardware_class")]
    pub hardware_class: HardwareClass,

    /// Number of concurrent executors.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Bound on a single stage-processing invocation (seconds). A timeout
    /// counts as a failed attempt.
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,

    /// How long shutdown waits for in-flight executors (seconds).
    #[serde(default = "default_drain_grace")]
    pub drain_grace_secs: u64,
}

fn default_hardware_class() -> HardwareClass {
    HardwareClass::Cpu
}

fn default_concurrency_limit() -> usize {
    2
}

fn default_process_timeout() -> u64 {
    300
}

fn default_drain_grace() -> u64 {
    30
}

impl PoolConfig {
    /// Create a pool config with defaults for the given stage and class.
    pub fn new(stage: Stage, hardware_class: HardwareClass) -> Self {
        Self {
            pool_id: format!("{}-{}", stage.as_label(), hardware_class.as_label()),
            stage,
            hardware_class,
            concurrency_limit: default_concurrency_limit(),
            process_timeout_secs: default_process_timeout(),
            drain_grace_secs: default_drain_grace(),
        }
    }

    /// Set the concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set the processing timeout.
    pub fn with_process_timeout_secs(mut self, secs: u64) -> Self {
        self.process_timeout_secs = secs;
        self
    }
}
