//! Worker pool manager: per-stage pools of concurrent executors.

mod config;
mod pool;
mod traits;
mod types;

pub use config::PoolConfig;
pub use pool::WorkerPool;
pub use traits::{ProcessError, StageOutcomeHandler, StageProcessor};
pub use types::PoolStatus;
