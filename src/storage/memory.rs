//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Throwaway runs where history does not matter
//!
//! All state sits behind one async mutex, so every operation, including
//! ticket allocation and result ingestion, is trivially atomic.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single process**: Exclusion only holds inside this process

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{HealthStatus, IngestOutcome, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::incident::{self, Transition};
use crate::model::{
    AlertRecipient, CheckResult, Incident, IncidentStatus, Monitor, MonitorId, MonitorLog,
    MonitorResult, NewMonitor, NewMonitorLog, SlugTicket, TicketNumber,
};

#[derive(Debug, Default)]
struct MemoryState {
    monitors: HashMap<MonitorId, Monitor>,
    tickets: Vec<SlugTicket>,
    results: Vec<MonitorResult>,
    logs: Vec<MonitorLog>,
    incidents: Vec<Incident>,
    recipients: Vec<AlertRecipient>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_monitor(
        &self,
        monitor: NewMonitor,
        now: DateTime<Utc>,
    ) -> StorageResult<Monitor> {
        let mut state = self.state.lock().await;
        let id = state.next_id();

        let monitor = Monitor {
            id,
            user_id: monitor.user_id,
            website_name: monitor.website_name,
            url: monitor.url,
            method: monitor.method,
            expected_status: monitor.expected_status,
            interval_secs: monitor.interval_secs,
            timeout_ms: monitor.timeout_ms,
            is_paused: monitor.is_paused,
            is_deleted: false,
            regions: monitor.regions,
            slug: None,
            last_checked_at: monitor.last_checked_at,
            created_at: now,
        };
        state.monitors.insert(id, monitor.clone());

        Ok(monitor)
    }

    async fn get_monitor(&self, id: MonitorId) -> StorageResult<Option<Monitor>> {
        Ok(self.state.lock().await.monitors.get(&id).cloned())
    }

    async fn due_monitors(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<Monitor>> {
        let state = self.state.lock().await;

        let mut due: Vec<Monitor> = state
            .monitors
            .values()
            .filter(|m| !m.is_paused && !m.is_deleted)
            .filter(|m| m.last_checked_at.is_none_or(|last| last <= cutoff))
            .cloned()
            .collect();
        due.sort_by_key(|m| m.id);

        Ok(due)
    }

    async fn mark_checked(&self, ids: &[MonitorId], at: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        let mut updated = 0;

        for id in ids {
            if let Some(monitor) = state.monitors.get_mut(id) {
                monitor.last_checked_at = Some(at);
                updated += 1;
            }
        }

        Ok(updated)
    }

    async fn set_slug(&self, id: MonitorId, slug: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;

        if state
            .monitors
            .values()
            .any(|m| m.slug.as_deref() == Some(slug))
        {
            return Err(StorageError::Conflict(format!("slug {slug} already taken")));
        }

        match state.monitors.get_mut(&id) {
            Some(monitor) if monitor.slug.is_none() => {
                monitor.slug = Some(slug.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_recipient(
        &self,
        monitor_id: MonitorId,
        email: &str,
    ) -> StorageResult<AlertRecipient> {
        let mut state = self.state.lock().await;

        if !state.monitors.contains_key(&monitor_id) {
            return Err(StorageError::NotFound(format!("monitor {monitor_id}")));
        }
        if state
            .recipients
            .iter()
            .any(|r| r.monitor_id == monitor_id && r.email == email)
        {
            return Err(StorageError::Conflict(format!(
                "{email} already receives alerts for monitor {monitor_id}"
            )));
        }

        let recipient = AlertRecipient {
            id: state.next_id(),
            monitor_id,
            email: email.to_string(),
        };
        state.recipients.push(recipient.clone());

        Ok(recipient)
    }

    async fn recipients(&self, monitor_id: MonitorId) -> StorageResult<Vec<AlertRecipient>> {
        let state = self.state.lock().await;
        Ok(state
            .recipients
            .iter()
            .filter(|r| r.monitor_id == monitor_id)
            .cloned()
            .collect())
    }

    async fn create_ticket(&self, range_start: i64, range_end: i64) -> StorageResult<SlugTicket> {
        let mut state = self.state.lock().await;

        let ticket = SlugTicket {
            id: state.next_id(),
            range_start,
            range_end,
            current_value: range_start,
        };
        state.tickets.push(ticket.clone());

        Ok(ticket)
    }

    async fn tickets(&self) -> StorageResult<Vec<SlugTicket>> {
        Ok(self.state.lock().await.tickets.clone())
    }

    async fn allocate_ticket(&self) -> StorageResult<Option<TicketNumber>> {
        let mut state = self.state.lock().await;

        let eligible: Vec<usize> = state
            .tickets
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_exhausted())
            .map(|(idx, _)| idx)
            .collect();

        let Some(&idx) = eligible.choose(&mut rand::thread_rng()) else {
            return Ok(None);
        };

        let ticket = &mut state.tickets[idx];
        let number = ticket.current_value;
        ticket.current_value += 1;

        Ok(Some(TicketNumber {
            ticket_id: ticket.id,
            number,
        }))
    }

    async fn ingest_result(
        &self,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> StorageResult<IngestOutcome> {
        let mut state = self.state.lock().await;

        let Some(last_checked_at) = state
            .monitors
            .get(&result.monitor_id)
            .map(|m| m.last_checked_at)
        else {
            return Err(StorageError::NotFound(format!(
                "monitor {} not found",
                result.monitor_id
            )));
        };

        let result_id = state.next_id();
        state.results.push(MonitorResult {
            id: result_id,
            monitor_id: result.monitor_id,
            region: result.region.clone(),
            is_up: result.is_up,
            status_code: result.status_code,
            response_time_ms: result.response_time,
            error_message: result.error_message.clone(),
            checked_at: now,
        });

        let log = NewMonitorLog::from_result(result);
        let log_id = state.next_id();
        state.logs.push(MonitorLog {
            id: log_id,
            monitor_id: result.monitor_id,
            region: result.region.clone(),
            level: log.level,
            message: log.message,
            meta: log.meta,
            created_at: now,
        });

        let open: Vec<Incident> = state
            .incidents
            .iter()
            .filter(|i| i.monitor_id == result.monitor_id && i.status == IncidentStatus::Open)
            .cloned()
            .collect();

        let decision = incident::decide(result.is_up, &result.region, &open, last_checked_at, now);
        let notified_at = decision.notify.then_some(now);

        let (incident, opened, resolved) = match decision.transition {
            Transition::Unchanged => (None, false, Vec::new()),
            Transition::Open { summary } => {
                let incident = Incident {
                    id: state.next_id(),
                    monitor_id: result.monitor_id,
                    status: IncidentStatus::Open,
                    summary,
                    started_at: now,
                    resolved_at: None,
                    last_notified_at: notified_at,
                };
                state.incidents.push(incident.clone());
                (Some(incident), true, Vec::new())
            }
            Transition::Continue { incident_id } => {
                let incident = state
                    .incidents
                    .iter_mut()
                    .find(|i| i.id == incident_id)
                    .map(|i| {
                        if notified_at.is_some() {
                            i.last_notified_at = notified_at;
                        }
                        i.clone()
                    });
                (incident, false, Vec::new())
            }
            Transition::Resolve { incident_ids } => {
                for incident in state
                    .incidents
                    .iter_mut()
                    .filter(|i| incident_ids.contains(&i.id))
                {
                    incident.status = IncidentStatus::Resolved;
                    incident.resolved_at = Some(now);
                }
                (None, false, incident_ids)
            }
        };

        if let Some(monitor) = state.monitors.get_mut(&result.monitor_id) {
            monitor.last_checked_at = Some(now);
        }

        debug!("in-memory ingest for monitor {}", result.monitor_id);

        Ok(IngestOutcome {
            result_id,
            incident,
            opened,
            resolved,
            notify: decision.notify,
        })
    }

    async fn open_incidents(&self, monitor_id: MonitorId) -> StorageResult<Vec<Incident>> {
        let state = self.state.lock().await;
        Ok(state
            .incidents
            .iter()
            .filter(|i| i.monitor_id == monitor_id && i.status == IncidentStatus::Open)
            .cloned()
            .collect())
    }

    async fn incidents(&self, monitor_id: MonitorId) -> StorageResult<Vec<Incident>> {
        let state = self.state.lock().await;
        Ok(state
            .incidents
            .iter()
            .filter(|i| i.monitor_id == monitor_id)
            .cloned()
            .collect())
    }

    async fn latest_results(
        &self,
        monitor_id: MonitorId,
        limit: usize,
    ) -> StorageResult<Vec<MonitorResult>> {
        let state = self.state.lock().await;
        Ok(state
            .results
            .iter()
            .rev()
            .filter(|r| r.monitor_id == monitor_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_logs(
        &self,
        monitor_id: MonitorId,
        limit: usize,
    ) -> StorageResult<Vec<MonitorLog>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .rev()
            .filter(|l| l.monitor_id == monitor_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.lock().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("monitors".to_string(), state.monitors.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
