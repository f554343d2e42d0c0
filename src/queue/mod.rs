//! Region job queues
//!
//! Each region owns one queue. The scheduler hands a [`QueueClient`] batches
//! of at most [`MAX_BATCH_SIZE`](crate::config::MAX_BATCH_SIZE) entries and
//! gets back which entries were accepted. A batch can partially fail; the
//! caller decides what to do with the failed entries.

pub mod http;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RegionConfig;
use crate::error::EngineError;
use crate::util::get_queue_token;

pub use http::HttpQueueClient;
pub use memory::MemoryQueue;

/// One message in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Unique within its batch
    pub id: String,
    pub message_body: String,
}

/// Entry the queue refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Per-entry result of a batch send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub successful: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Queue rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid queue response: {0}")]
    InvalidResponse(String),

    #[error("Queue send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl From<QueueError> for EngineError {
    fn from(err: QueueError) -> Self {
        EngineError::dependency(err.to_string())
    }
}

/// Transport to a region's job queue
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send up to ten entries to `queue_url` in one request
    async fn send_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchOutcome, QueueError>;
}

/// A region's queue endpoint
#[derive(Clone)]
pub struct RegionQueue {
    pub queue_url: String,
    pub client: Arc<dyn QueueClient>,
}

/// Region id to queue mapping, fixed after startup
#[derive(Clone, Default)]
pub struct RegionRegistry {
    regions: BTreeMap<String, RegionQueue>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP clients for every configured region
    ///
    /// Tokens from the environment take precedence over the config file.
    pub fn from_config(regions: &[RegionConfig], timeout: Duration) -> Result<Self, QueueError> {
        let mut registry = Self::new();
        for region in regions {
            let token = get_queue_token(&region.id, region.token.as_deref());
            let client = HttpQueueClient::new(token, timeout)?;
            registry = registry.with_region(&region.id, &region.queue_url, Arc::new(client));
        }
        Ok(registry)
    }

    pub fn with_region(
        mut self,
        id: &str,
        queue_url: &str,
        client: Arc<dyn QueueClient>,
    ) -> Self {
        self.regions.insert(
            id.to_string(),
            RegionQueue {
                queue_url: queue_url.to_string(),
                client,
            },
        );
        self
    }

    pub fn get(&self, region: &str) -> Option<&RegionQueue> {
        self.regions.get(region)
    }

    pub fn region_ids(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }
}
