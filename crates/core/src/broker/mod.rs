//! Durable message channel between the coordinator and worker pools.

mod memory;
mod traits;
mod types;

pub use memory::MemoryBroker;
pub use traits::{Broker, Subscription};
pub use types::{AckHandle, BrokerError, Delivery};
