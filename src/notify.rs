//! Downtime notifications
//!
//! The ingestor never waits for delivery: it hands a [`DowntimeAlert`] to the
//! [`NotificationHandle`], whose actor calls the configured [`Notifier`] and
//! logs failures. A failed notification never affects the stored result.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument};

use crate::error::{EngineError, EngineResult};
use crate::model::{AlertRecipient, MonitorId};
use crate::storage::{StorageBackend, StorageError};

const DEFAULT_ISSUE: &str = "No details available.";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Subscribe `email` to downtime alerts for `monitor_id`
pub async fn add_alert_recipient(
    store: &dyn StorageBackend,
    monitor_id: MonitorId,
    email: &str,
) -> EngineResult<AlertRecipient> {
    let email = email.trim();
    if !is_valid_email(email) {
        return Err(EngineError::validation(format!(
            "invalid recipient email: {email}"
        )));
    }
    Ok(store.add_recipient(monitor_id, email).await?)
}

/// A monitor went down and the throttle allows a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DowntimeAlert {
    pub monitor_id: MonitorId,
    pub region: String,
    pub error_message: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// What happened to an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent { recipients: usize },
    /// Nobody to tell
    Skipped,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Notification relay answered with status {0}")]
    Rejected(u16),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Monitor {0} not found")]
    MonitorMissing(MonitorId),
}

/// Delivers downtime alerts to a monitor's recipients
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &DowntimeAlert) -> Result<Delivery, NotifyError>;
}

/// Body posted to the notification relay
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub subject: String,
    pub website_name: String,
    pub url: String,
    pub region: String,
    pub issue: String,
    pub detected_at: DateTime<Utc>,
    pub recipients: Vec<String>,
}

/// Posts alerts as JSON to a relay that fans them out by email
pub struct WebhookNotifier {
    client: Client,
    url: String,
    store: Arc<dyn StorageBackend>,
}

impl WebhookNotifier {
    pub fn new(
        url: impl ToString,
        timeout: Duration,
        store: Arc<dyn StorageBackend>,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
            store,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, alert), fields(monitor_id = alert.monitor_id))]
    async fn notify(&self, alert: &DowntimeAlert) -> Result<Delivery, NotifyError> {
        let recipients: Vec<String> = self
            .store
            .recipients(alert.monitor_id)
            .await?
            .into_iter()
            .map(|r| r.email)
            .filter(|email| is_valid_email(email))
            .collect();
        if recipients.is_empty() {
            debug!("no alert recipients configured");
            return Ok(Delivery::Skipped);
        }

        let monitor = self
            .store
            .get_monitor(alert.monitor_id)
            .await?
            .ok_or(NotifyError::MonitorMissing(alert.monitor_id))?;

        let payload = AlertPayload {
            subject: format!("Downtime Alert: {} is unreachable", monitor.website_name),
            website_name: monitor.website_name,
            url: monitor.url,
            region: alert.region.clone(),
            issue: alert
                .error_message
                .clone()
                .unwrap_or_else(|| DEFAULT_ISSUE.to_string()),
            detected_at: alert.detected_at,
            recipients,
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }

        Ok(Delivery::Sent {
            recipients: payload.recipients.len(),
        })
    }
}

/// Notifier used when no relay is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &DowntimeAlert) -> Result<Delivery, NotifyError> {
        info!(
            monitor_id = alert.monitor_id,
            region = %alert.region,
            "monitor is down: {}",
            alert.error_message.as_deref().unwrap_or(DEFAULT_ISSUE)
        );
        Ok(Delivery::Skipped)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationStats {
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Alerts lost because the queue was full
    pub dropped: u64,
}

#[derive(Debug)]
enum NotificationCommand {
    Deliver(DowntimeAlert),
    GetStats {
        respond_to: oneshot::Sender<NotificationStats>,
    },
    Shutdown,
}

struct NotificationActor {
    notifier: Arc<dyn Notifier>,
    command_rx: mpsc::Receiver<NotificationCommand>,
    stats: NotificationStats,
}

impl NotificationActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting notification actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                NotificationCommand::Deliver(alert) => self.deliver(alert).await,
                NotificationCommand::GetStats { respond_to } => {
                    let _ = respond_to.send(self.stats.clone());
                }
                NotificationCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!("notification actor stopped");
    }

    async fn deliver(&mut self, alert: DowntimeAlert) {
        match self.notifier.notify(&alert).await {
            Ok(Delivery::Sent { recipients }) => {
                info!(
                    monitor_id = alert.monitor_id,
                    "downtime alert sent to {recipients} recipients"
                );
                self.stats.sent += 1;
            }
            Ok(Delivery::Skipped) => self.stats.skipped += 1,
            Err(e) => {
                error!(monitor_id = alert.monitor_id, "failed to send downtime alert: {e}");
                self.stats.failed += 1;
            }
        }
    }
}

/// Handle for the background notification actor
#[derive(Clone)]
pub struct NotificationHandle {
    sender: mpsc::Sender<NotificationCommand>,
    dropped: Arc<std::sync::atomic::AtomicU64>,
}

impl NotificationHandle {
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = NotificationActor {
            notifier,
            command_rx: cmd_rx,
            stats: NotificationStats::default(),
        };
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            dropped: Arc::default(),
        }
    }

    /// Queue an alert without waiting for delivery
    pub fn dispatch(&self, alert: DowntimeAlert) -> bool {
        let monitor_id = alert.monitor_id;
        match self.sender.try_send(NotificationCommand::Deliver(alert)) {
            Ok(()) => true,
            Err(e) => {
                error!(monitor_id, "could not queue downtime alert: {e}");
                self.dropped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                false
            }
        }
    }

    /// Stats after every previously queued alert has been handled
    pub async fn stats(&self) -> anyhow::Result<NotificationStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotificationCommand::GetStats { respond_to: tx })
            .await?;
        let mut stats = rx.await?;
        stats.dropped = self.dropped.load(std::sync::atomic::Ordering::Relaxed);
        Ok(stats)
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(NotificationCommand::Shutdown).await;
    }
}
