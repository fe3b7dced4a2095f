//! Broker trait definitions.

use async_trait::async_trait;

use crate::job::{HardwareClass, Stage, WorkerClass};

use super::types::{AckHandle, BrokerError, Delivery};

/// A durable message channel between the coordinator and the worker pools.
///
/// Delivery is at-least-once: a delivery that is not acked within the
/// broker's visibility timeout is handed out again, so consumers must treat
/// every delivery as possibly-duplicate. Messages are routed by a
/// (stage, worker class) partition key; a `Gpu`-classed message is never
/// handed to a `Cpu` subscriber and vice versa, while `Any` messages are
/// deliverable to both.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a job on the given stage partition.
    async fn publish(
        &self,
        stage: Stage,
        class: WorkerClass,
        job_id: &str,
    ) -> Result<(), BrokerError>;

    /// Open a subscription for the given stage and hardware class.
    async fn subscribe(
        &self,
        stage: Stage,
        class: HardwareClass,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Acknowledge a delivery, removing the message permanently.
    ///
    /// Acking a delivery whose visibility timeout already expired is a
    /// no-op: the redelivered copy owns the message now.
    async fn ack(&self, handle: &AckHandle) -> Result<(), BrokerError>;

    /// Negatively acknowledge a delivery. With `requeue` the message
    /// returns to the ready queue for immediate redelivery; without it the
    /// message is dropped permanently.
    async fn nack(&self, handle: &AckHandle, requeue: bool) -> Result<(), BrokerError>;
}

/// A lazy sequence of deliveries for one (stage, hardware class) pair.
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next delivery, waiting until one is available.
    async fn recv(&mut self) -> Option<Delivery>;
}
