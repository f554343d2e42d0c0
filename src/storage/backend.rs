//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use crate::model::{
    AlertRecipient, CheckResult, Incident, Monitor, MonitorId, MonitorLog, MonitorResult,
    NewMonitor, SlugTicket, TicketNumber,
};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// What a single result ingestion changed
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// Id of the persisted history row
    pub result_id: i64,

    /// Incident opened or continued by a down result
    pub incident: Option<Incident>,

    /// True when `incident` was created by this result
    pub opened: bool,

    /// Incidents resolved by an up result
    pub resolved: Vec<i64>,

    /// Whether a downtime notification should go out
    pub notify: bool,
}

/// Trait for persistent storage backends
///
/// ## Atomicity
///
/// - `allocate_ticket` must select and advance a ticket in one atomic step;
///   two concurrent callers never receive the same number.
/// - `ingest_result` persists the result, its log entry, the incident
///   transition and the monitor watermark as one unit, serialised per monitor.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across the
/// scheduler, ingestor and background actors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert a monitor and return it with its id
    async fn insert_monitor(&self, monitor: NewMonitor, now: DateTime<Utc>)
    -> StorageResult<Monitor>;

    async fn get_monitor(&self, id: MonitorId) -> StorageResult<Option<Monitor>>;

    /// Monitors that are not paused or deleted and whose `last_checked_at`
    /// is unset or at or before `cutoff`
    async fn due_monitors(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<Monitor>>;

    /// Advance `last_checked_at` for the given monitors
    ///
    /// Returns the number of monitors updated.
    async fn mark_checked(&self, ids: &[MonitorId], at: DateTime<Utc>) -> StorageResult<usize>;

    /// Write the slug if the monitor has none yet
    ///
    /// Returns false when the monitor already had a slug (or does not exist).
    async fn set_slug(&self, id: MonitorId, slug: &str) -> StorageResult<bool>;

    async fn add_recipient(&self, monitor_id: MonitorId, email: &str)
    -> StorageResult<AlertRecipient>;

    async fn recipients(&self, monitor_id: MonitorId) -> StorageResult<Vec<AlertRecipient>>;

    /// Provision a ticket covering `[range_start, range_end)`
    async fn create_ticket(&self, range_start: i64, range_end: i64) -> StorageResult<SlugTicket>;

    async fn tickets(&self) -> StorageResult<Vec<SlugTicket>>;

    /// Pick a random non-exhausted ticket and take its next number
    ///
    /// Returns `None` when every ticket is exhausted.
    async fn allocate_ticket(&self) -> StorageResult<Option<TicketNumber>>;

    /// Persist one probe result and drive the incident state machine
    ///
    /// Fails with `StorageError::NotFound` before writing anything if the
    /// monitor does not exist.
    async fn ingest_result(
        &self,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> StorageResult<IngestOutcome>;

    async fn open_incidents(&self, monitor_id: MonitorId) -> StorageResult<Vec<Incident>>;

    /// All incidents for a monitor, oldest first
    async fn incidents(&self, monitor_id: MonitorId) -> StorageResult<Vec<Incident>>;

    /// Most recent results, newest first
    async fn latest_results(
        &self,
        monitor_id: MonitorId,
        limit: usize,
    ) -> StorageResult<Vec<MonitorResult>>;

    /// Most recent log entries, newest first
    async fn latest_logs(&self, monitor_id: MonitorId, limit: usize)
    -> StorageResult<Vec<MonitorLog>>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

/// Bound a storage call by `limit`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StorageError::Timeout(limit))?
}
