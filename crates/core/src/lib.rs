pub mod broker;
pub mod config;
pub mod coordinator;
pub mod job;
pub mod metrics;
pub mod sink;
pub mod testing;
pub mod worker;

pub use broker::{AckHandle, Broker, BrokerError, Delivery, MemoryBroker, Subscription};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError,
};
pub use coordinator::{
    CoordinatorConfig, CoordinatorError, CoordinatorStatus, PipelineCoordinator, RetryPolicy,
};
pub use job::{
    CreateJobRequest, HardwareClass, JobEnvelope, JobFilter, JobStage, JobStore, SqliteJobStore,
    Stage, StoreError, WorkerClass,
};
pub use sink::{JobNotification, JobOutcome, LogSink, ResultSink};
pub use worker::{
    PoolConfig, PoolStatus, ProcessError, StageOutcomeHandler, StageProcessor, WorkerPool,
};
