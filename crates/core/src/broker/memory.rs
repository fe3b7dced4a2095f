//! In-memory broker implementation.
//!
//! Used as the process-local channel between the coordinator and the worker
//! pools, and as the substitute transport in tests. Redelivery is driven by
//! deadlines: expired in-flight messages fold back into their ready queue on
//! the next access, so no background sweeper task is needed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::job::{HardwareClass, Stage, WorkerClass};

use super::traits::{Broker, Subscription};
use super::types::{AckHandle, BrokerError, Delivery};

/// How long an idle subscriber waits before re-checking redelivery deadlines.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Routing lane: one ready queue per (stage, worker class) pair.
type Lane = (Stage, WorkerClass);

struct InFlight {
    lane: Lane,
    job_id: String,
    deadline: Instant,
}

struct BrokerState {
    ready: HashMap<Lane, VecDeque<String>>,
    in_flight: HashMap<u64, InFlight>,
    next_token: u64,
    available: bool,
}

struct Inner {
    visibility_timeout: Duration,
    state: Mutex<BrokerState>,
    /// One notifier per (stage, hardware class) subscriber group.
    notifiers: HashMap<(Stage, HardwareClass), Arc<Notify>>,
}

impl Inner {
    /// Fold expired in-flight messages back into their ready queues.
    /// Must be called with fresh `now` under the state lock.
    fn requeue_expired(state: &mut BrokerState, now: Instant) {
        let expired: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            if let Some(flight) = state.in_flight.remove(&token) {
                debug!(job_id = %flight.job_id, "visibility timeout expired, redelivering");
                state.ready.entry(flight.lane).or_default().push_back(flight.job_id);
            }
        }
    }

    fn try_claim(&self, stage: Stage, class: HardwareClass) -> Option<Delivery> {
        let mut state = self.state.lock().unwrap();
        if !state.available {
            return None;
        }

        let now = Instant::now();
        Self::requeue_expired(&mut state, now);

        let class_lane = match class {
            HardwareClass::Cpu => (stage, WorkerClass::Cpu),
            HardwareClass::Gpu => (stage, WorkerClass::Gpu),
        };

        for lane in [class_lane, (stage, WorkerClass::Any)] {
            let job_id = match state.ready.get_mut(&lane).and_then(|q| q.pop_front()) {
                Some(id) => id,
                None => continue,
            };

            let token = state.next_token;
            state.next_token += 1;
            state.in_flight.insert(
                token,
                InFlight {
                    lane,
                    job_id: job_id.clone(),
                    deadline: now + self.visibility_timeout,
                },
            );

            return Some(Delivery {
                job_id,
                handle: AckHandle::new(token),
            });
        }

        None
    }

    fn notify_lane(&self, stage: Stage, class: WorkerClass) {
        match class {
            WorkerClass::Cpu => self.notify(stage, HardwareClass::Cpu),
            WorkerClass::Gpu => self.notify(stage, HardwareClass::Gpu),
            WorkerClass::Any => {
                self.notify(stage, HardwareClass::Cpu);
                self.notify(stage, HardwareClass::Gpu);
            }
        }
    }

    fn notify(&self, stage: Stage, class: HardwareClass) {
        if let Some(notify) = self.notifiers.get(&(stage, class)) {
            notify.notify_waiters();
        }
    }
}

/// In-memory [`Broker`] with visibility-timeout redelivery.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Create a broker with the given visibility timeout.
    pub fn new(visibility_timeout: Duration) -> Self {
        let mut notifiers = HashMap::new();
        for stage in [Stage::Capture, Stage::Detection] {
            for class in [HardwareClass::Cpu, HardwareClass::Gpu] {
                notifiers.insert((stage, class), Arc::new(Notify::new()));
            }
        }

        Self {
            inner: Arc::new(Inner {
                visibility_timeout,
                state: Mutex::new(BrokerState {
                    ready: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_token: 0,
                    available: true,
                }),
                notifiers,
            }),
        }
    }

    /// Flip availability; while unavailable, publishes fail and no
    /// deliveries are handed out. Used to simulate a broker outage.
    pub fn set_available(&self, available: bool) {
        let mut state = self.inner.state.lock().unwrap();
        state.available = available;
    }

    /// Number of messages waiting in all ready lanes of a stage.
    pub fn ready_len(&self, stage: Stage) -> usize {
        let state = self.inner.state.lock().unwrap();
        state
            .ready
            .iter()
            .filter(|((s, _), _)| *s == stage)
            .map(|(_, q)| q.len())
            .sum()
    }

    /// Number of unacked deliveries across all lanes.
    pub fn in_flight_len(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.in_flight.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(
        &self,
        stage: Stage,
        class: WorkerClass,
        job_id: &str,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.available {
                return Err(BrokerError::Unavailable("broker is offline".to_string()));
            }
            state
                .ready
                .entry((stage, class))
                .or_default()
                .push_back(job_id.to_string());
        }

        self.inner.notify_lane(stage, class);
        Ok(())
    }

    async fn subscribe(
        &self,
        stage: Stage,
        class: HardwareClass,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let notify = self
            .inner
            .notifiers
            .get(&(stage, class))
            .cloned()
            .expect("notifier exists for every stage/class pair");

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            stage,
            class,
            notify,
        }))
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.in_flight.remove(&handle.token).is_none() {
            debug!(token = handle.token, "ack for expired delivery, ignoring");
        }
        Ok(())
    }

    async fn nack(&self, handle: &AckHandle, requeue: bool) -> Result<(), BrokerError> {
        let flight = {
            let mut state = self.inner.state.lock().unwrap();
            match state.in_flight.remove(&handle.token) {
                Some(flight) => {
                    if requeue {
                        state
                            .ready
                            .entry(flight.lane)
                            .or_default()
                            .push_back(flight.job_id.clone());
                    }
                    Some(flight)
                }
                None => {
                    debug!(token = handle.token, "nack for expired delivery, ignoring");
                    None
                }
            }
        };

        if requeue {
            if let Some(flight) = flight {
                self.inner.notify_lane(flight.lane.0, flight.lane.1);
            }
        }
        Ok(())
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    stage: Stage,
    class: HardwareClass,
    notify: Arc<Notify>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.inner.try_claim(self.stage, self.class) {
                return Some(delivery);
            }
            // Wake on publish/requeue, or after a slice to re-check deadlines.
            let _ = tokio::time::timeout(WAIT_SLICE, self.notify.notified()).await;
        }
    }
}
