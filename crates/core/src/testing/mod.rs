//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of the external collaborator
//! traits, allowing full pipeline testing without cameras, detection models
//! or a chat-bot transport.
//!
//! # Example
//!
//! ```rust,ignore
//! use watchpost_core::testing::{MockSink, MockStageProcessor};
//!
//! let capture = MockStageProcessor::new();
//! let detection = MockStageProcessor::new();
//! let sink = MockSink::new();
//!
//! // Configure mock behavior
//! detection.push_outcome(Err(ProcessError::Transient("flaky".into()))).await;
//!
//! // Wire into WorkerPool / PipelineCoordinator...
//! ```

mod mock_processor;
mod mock_sink;

pub use mock_processor::{MockStageProcessor, RecordedProcess};
pub use mock_sink::MockSink;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::job::{CreateJobRequest, WorkerClass};

    /// Create a job request with reasonable defaults.
    pub fn job_request(payload_ref: &str) -> CreateJobRequest {
        CreateJobRequest {
            payload_ref: payload_ref.to_string(),
            worker_class_hint: WorkerClass::Any,
            max_attempts: 5,
        }
    }

    /// Create a job request pinned to a worker class.
    pub fn classed_job_request(payload_ref: &str, class: WorkerClass) -> CreateJobRequest {
        CreateJobRequest {
            worker_class_hint: class,
            ..job_request(payload_ref)
        }
    }
}
