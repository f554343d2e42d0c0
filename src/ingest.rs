//! Result ingestion
//!
//! One call per probe result:
//!
//! 1. reject unknown monitors before anything is written,
//! 2. persist the result and its log entry,
//! 3. open, continue or resolve the monitor's incident,
//! 4. advance `last_checked_at` to the ingestion time.
//!
//! Steps 2 to 4 happen atomically inside the storage backend. A notification
//! the incident decision asks for is handed to the [`NotificationHandle`]
//! after the commit and never delays or fails the ingestion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::model::CheckResult;
use crate::notify::{DowntimeAlert, NotificationHandle};
use crate::storage::{IngestOutcome, StorageBackend, StorageError, with_timeout};

#[derive(Clone)]
pub struct ResultIngestor {
    store: Arc<dyn StorageBackend>,
    notifications: NotificationHandle,
    db_timeout: Duration,
}

impl ResultIngestor {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        notifications: NotificationHandle,
        db_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifications,
            db_timeout,
        }
    }

    pub async fn ingest(&self, result: CheckResult) -> EngineResult<IngestOutcome> {
        self.ingest_at(result, Utc::now()).await
    }

    /// Ingest `result` as if it arrived at `now`
    #[instrument(skip(self, result), fields(monitor_id = result.monitor_id, region = %result.region))]
    pub async fn ingest_at(
        &self,
        result: CheckResult,
        now: DateTime<Utc>,
    ) -> EngineResult<IngestOutcome> {
        result.validate()?;

        let outcome = with_timeout(self.db_timeout, self.store.ingest_result(&result, now))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => {
                    EngineError::not_found(format!("Monitor {} not found", result.monitor_id))
                }
                other => other.into(),
            })?;

        if outcome.opened {
            info!("incident opened: monitor is down from {}", result.region);
        }
        if !outcome.resolved.is_empty() {
            info!("resolved {} incident(s)", outcome.resolved.len());
        }

        if outcome.notify {
            let queued = self.notifications.dispatch(DowntimeAlert {
                monitor_id: result.monitor_id,
                region: result.region.clone(),
                error_message: result.error_message.clone(),
                detected_at: now,
            });
            if !queued {
                warn!("downtime alert dropped");
            }
        }

        debug!(result_id = outcome.result_id, "result saved");
        Ok(outcome)
    }
}
