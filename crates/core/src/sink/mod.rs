//! Terminal result notification contract.

mod log;
mod traits;
mod types;

pub use log::LogSink;
pub use traits::ResultSink;
pub use types::{JobNotification, JobOutcome};
