//! Mock result sink for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::sink::{JobNotification, ResultSink};

/// Mock implementation of the [`ResultSink`] trait that records every
/// notification for test assertions.
#[derive(Clone, Default)]
pub struct MockSink {
    notifications: Arc<RwLock<Vec<JobNotification>>>,
}

impl MockSink {
    /// Create a new mock sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded notifications.
    pub async fn notifications(&self) -> Vec<JobNotification> {
        self.notifications.read().await.clone()
    }

    /// Notifications recorded for one job.
    pub async fn notifications_for(&self, job_id: &str) -> Vec<JobNotification> {
        self.notifications
            .read()
            .await
            .iter()
            .filter(|n| n.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Total notification count.
    pub async fn count(&self) -> usize {
        self.notifications.read().await.len()
    }
}

#[async_trait]
impl ResultSink for MockSink {
    async fn notify(&self, notification: JobNotification) {
        self.notifications.write().await.push(notification);
    }
}
