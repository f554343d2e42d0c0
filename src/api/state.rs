//! API shared state

use std::sync::Arc;

use crate::ingest::ResultIngestor;
use crate::slug::SlugHandle;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Backend for monitor reads and health checks
    pub store: Arc<dyn StorageBackend>,

    /// Entry point for submitted results
    pub ingestor: ResultIngestor,

    /// Background slug assignment for new monitors
    pub slugs: SlugHandle,
}

impl ApiState {
    pub fn new(store: Arc<dyn StorageBackend>, ingestor: ResultIngestor, slugs: SlugHandle) -> Self {
        Self {
            store,
            ingestor,
            slugs,
        }
    }
}
