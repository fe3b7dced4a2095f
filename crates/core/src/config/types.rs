use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::coordinator::CoordinatorConfig;
use crate::job::{HardwareClass, Stage};
use crate::worker::PoolConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default = "StageConfig::capture_defaults")]
    pub capture: StageConfig,
    #[serde(default = "StageConfig::detection_defaults")]
    pub detection: StageConfig,
}

impl Config {
    /// Pool config for the capture stage.
    pub fn capture_pool(&self) -> PoolConfig {
        self.capture.to_pool_config(Stage::Capture)
    }

    /// Pool config for the detection stage.
    pub fn detection_pool(&self) -> PoolConfig {
        self.detection.to_pool_config(Stage::Detection)
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("watchpost.db")
}

/// Broker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Seconds after which an unacked delivery is redelivered.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

fn default_visibility_timeout() -> u64 {
    120
}

/// Per-stage worker pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageConfig {
    /// Hardware class the stage's pool runs on.
    #[serde(default = "default_hardware_class")]
    pub hardware_class: HardwareClass,

    /// Number of concurrent executors.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Bound on one processing invocation (seconds).
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,

    /// Shutdown grace period (seconds).
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

impl StageConfig {
    fn capture_defaults() -> Self {
        Self {
            hardware_class: HardwareClass::Cpu,
            concurrency_limit: default_concurrency_limit(),
            process_timeout_secs: default_process_timeout(),
            drain_grace_secs: default_drain_grace(),
        }
    }

    fn detection_defaults() -> Self {
        Self::capture_defaults()
    }

    fn to_pool_config(&self, stage: Stage) -> PoolConfig {
        PoolConfig {
            pool_id: format!("{}-{}", stage.as_label(), self.hardware_class.as_label()),
            stage,
            hardware_class: self.hardware_class,
            concurrency_limit: self.concurrency_limit,
            process_timeout_secs: self.process_timeout_secs,
            drain_grace_secs: self.drain_grace_secs,
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::capture_defaults()
    }
}
