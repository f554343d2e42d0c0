//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::Mutex;
use upwatch::{
    config::SchedulerConfig,
    ingest::ResultIngestor,
    model::{CheckResult, HttpMethod, NewMonitor},
    notify::{Delivery, DowntimeAlert, NotificationHandle, Notifier, NotifyError},
    queue::{MemoryQueue, RegionRegistry},
    scheduler::Scheduler,
    storage::{StorageBackend, sqlite::SqliteBackend},
};

pub const DB_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite backend in a fresh temporary directory
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn sqlite_store() -> (Arc<dyn StorageBackend>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteBackend::new(dir.path().join("upwatch.db"))
        .await
        .unwrap();
    (Arc::new(store), dir)
}

/// Current time truncated to what SQLite stores
pub fn now_millis() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(Utc::now().timestamp_millis())
        .unwrap()
}

pub fn new_monitor(regions: &[&str]) -> NewMonitor {
    NewMonitor {
        user_id: 1,
        website_name: "Example".to_string(),
        url: "https://example.com/health".to_string(),
        method: HttpMethod::Get,
        expected_status: 200,
        interval_secs: 180,
        timeout_ms: 5000,
        is_paused: false,
        regions: regions.iter().map(|r| r.to_string()).collect(),
        last_checked_at: None,
    }
}

pub fn down(monitor_id: i64, region: &str) -> CheckResult {
    CheckResult {
        monitor_id,
        region: region.to_string(),
        status_code: Some(503),
        is_up: false,
        response_time: 840,
        error_message: Some("Service Unavailable".to_string()),
    }
}

pub fn up(monitor_id: i64, region: &str) -> CheckResult {
    CheckResult {
        monitor_id,
        region: region.to_string(),
        status_code: Some(200),
        is_up: true,
        response_time: 95,
        error_message: None,
    }
}

/// Notifier that remembers every alert it was asked to deliver
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<DowntimeAlert>>,
}

impl RecordingNotifier {
    pub async fn alerts(&self) -> Vec<DowntimeAlert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &DowntimeAlert) -> Result<Delivery, NotifyError> {
        self.alerts.lock().await.push(alert.clone());
        Ok(Delivery::Sent { recipients: 1 })
    }
}

pub struct IngestFixture {
    pub ingestor: ResultIngestor,
    pub notifications: NotificationHandle,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn ingest_fixture(store: Arc<dyn StorageBackend>) -> IngestFixture {
    let notifier = Arc::new(RecordingNotifier::default());
    let notifications = NotificationHandle::spawn(notifier.clone());
    IngestFixture {
        ingestor: ResultIngestor::new(store, notifications.clone(), DB_TIMEOUT),
        notifications,
        notifier,
    }
}

/// Every region backed by the same in-memory queue
pub fn memory_registry(queue: Arc<MemoryQueue>, regions: &[&str]) -> RegionRegistry {
    regions.iter().fold(RegionRegistry::new(), |registry, region| {
        registry.with_region(region, &format!("mem://{region}"), queue.clone())
    })
}

pub fn scheduler(store: Arc<dyn StorageBackend>, regions: RegionRegistry) -> Scheduler {
    Scheduler::new(store, regions, &SchedulerConfig::default(), DB_TIMEOUT)
}
