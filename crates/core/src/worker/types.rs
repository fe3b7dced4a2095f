//! Types for the worker pool manager.

use serde::{Deserialize, Serialize};

use crate::job::{HardwareClass, Stage};

/// Snapshot of one worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Pool identifier.
    pub pool_id: String,
    /// Stage this pool serves.
    pub stage: Stage,
    /// Hardware class of this pool.
    pub hardware_class: HardwareClass,
    /// Whether the pool is accepting work.
    pub running: bool,
    /// Executors currently processing a claimed job.
    pub active: usize,
    /// Maximum concurrent executors.
    pub concurrency_limit: usize,
    /// Attempts completed successfully since start.
    pub total_processed: u64,
    /// Attempts that failed since start.
    pub total_failed: u64,
}
