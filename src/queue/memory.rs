use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BatchEntry, BatchOutcome, FailedEntry, QueueClient, QueueError};
use crate::model::{CheckJob, MonitorId};

/// A batch as received by [`MemoryQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBatch {
    pub queue_url: String,
    pub entries: Vec<BatchEntry>,
}

impl SentBatch {
    /// Decode every entry body as a [`CheckJob`]
    pub fn jobs(&self) -> Vec<CheckJob> {
        self.entries
            .iter()
            .filter_map(|e| serde_json::from_str(&e.message_body).ok())
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryQueueState {
    batches: Vec<SentBatch>,
    failing_monitors: HashSet<MonitorId>,
    unavailable: bool,
    delay: Option<Duration>,
}

/// In-process queue that records every batch
///
/// Entries for monitors marked with [`fail_monitor`](Self::fail_monitor) are
/// reported as failed. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report entries for `monitor_id` as failed
    pub async fn fail_monitor(&self, monitor_id: MonitorId) {
        self.state.lock().await.failing_monitors.insert(monitor_id);
    }

    /// Fail whole batches at the transport level
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Delay every send, e.g. to trigger caller timeouts
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.delay = delay;
    }

    pub async fn batches(&self) -> Vec<SentBatch> {
        self.state.lock().await.batches.clone()
    }

    pub async fn jobs(&self) -> Vec<CheckJob> {
        self.state
            .lock()
            .await
            .batches
            .iter()
            .flat_map(SentBatch::jobs)
            .collect()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn send_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchOutcome, QueueError> {
        let delay = self.state.lock().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(QueueError::Unavailable(queue_url.to_string()));
        }

        let mut outcome = BatchOutcome::default();
        let mut accepted = Vec::new();
        for entry in entries {
            let monitor_id = serde_json::from_str::<CheckJob>(&entry.message_body)
                .ok()
                .map(|job| job.monitor_id);

            if monitor_id.is_some_and(|id| state.failing_monitors.contains(&id)) {
                outcome.failed.push(FailedEntry {
                    id: entry.id.clone(),
                    code: "InternalError".to_string(),
                    message: "rejected by memory queue".to_string(),
                });
            } else {
                outcome.successful.push(entry.id.clone());
                accepted.push(entry.clone());
            }
        }

        state.batches.push(SentBatch {
            queue_url: queue_url.to_string(),
            entries: accepted,
        });

        Ok(outcome)
    }
}
