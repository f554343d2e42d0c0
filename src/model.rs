//! Data model and wire types
//!
//! Rows mirror the SQLite schema in `migrations/`. The two wire types,
//! [`CheckJob`] (scheduler → region queue) and [`CheckResult`] (probe →
//! ingestor), serialise with camelCase keys.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub type MonitorId = i64;

/// HTTP method the probe uses against the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            other => Err(EngineError::validation(format!(
                "unsupported HTTP method: {other}"
            ))),
        }
    }
}

/// A registered website
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: MonitorId,
    pub user_id: i64,
    pub website_name: String,
    pub url: String,
    pub method: HttpMethod,
    pub expected_status: u16,
    /// Configured interval. The scheduler uses the global floor instead.
    pub interval_secs: u32,
    pub timeout_ms: u32,
    pub is_paused: bool,
    pub is_deleted: bool,
    /// Never empty
    pub regions: Vec<String>,
    /// Assigned once, asynchronously after creation
    pub slug: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a monitor
#[derive(Debug, Clone)]
pub struct NewMonitor {
    pub user_id: i64,
    pub website_name: String,
    pub url: String,
    pub method: HttpMethod,
    pub expected_status: u16,
    pub interval_secs: u32,
    pub timeout_ms: u32,
    pub is_paused: bool,
    pub regions: Vec<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl NewMonitor {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.regions.is_empty() {
            return Err(EngineError::validation("monitor needs at least one region"));
        }
        if self.regions.iter().any(|r| r.trim().is_empty()) {
            return Err(EngineError::validation("region identifiers must not be empty"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(EngineError::validation(format!(
                "url must be http(s): {}",
                self.url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::validation("timeout must be positive"));
        }
        Ok(())
    }
}

/// Job message sent to a region queue, one per monitor × region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckJob {
    pub region: String,
    pub monitor_id: MonitorId,
    pub url: String,
    pub method: HttpMethod,
    pub expected_status: u16,
    /// Milliseconds
    pub timeout: u32,
}

impl CheckJob {
    pub fn new(monitor: &Monitor, region: &str) -> Self {
        Self {
            region: region.to_string(),
            monitor_id: monitor.id,
            url: monitor.url.clone(),
            method: monitor.method,
            expected_status: monitor.expected_status,
            timeout: monitor.timeout_ms,
        }
    }
}

/// Result submitted by a region probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub monitor_id: MonitorId,
    pub region: String,
    /// Probes may report `0` or other non-HTTP codes on connection failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    pub is_up: bool,
    /// Milliseconds
    pub response_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CheckResult {
    /// Semantic checks on top of what deserialisation already enforces
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.region.trim().is_empty() {
            return Err(EngineError::validation("region must not be empty"));
        }
        Ok(())
    }
}

/// Immutable history row for one probe attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorResult {
    pub id: i64,
    pub monitor_id: MonitorId,
    pub region: String,
    pub is_up: bool,
    pub status_code: Option<i64>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Human-readable log entry derived from a result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorLog {
    pub id: i64,
    pub monitor_id: MonitorId,
    pub region: String,
    pub level: LogLevel,
    pub message: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Log entry before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewMonitorLog {
    pub level: LogLevel,
    pub message: String,
    pub meta: serde_json::Value,
}

impl NewMonitorLog {
    pub fn from_result(result: &CheckResult) -> Self {
        let status = result
            .status_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let (level, message) = if result.is_up {
            (LogLevel::Info, format!("Monitor responded with status {status}"))
        } else {
            let reason = result.error_message.as_deref().unwrap_or("unknown error");
            (LogLevel::Error, format!("Monitor failed: {reason}"))
        };

        Self {
            level,
            message,
            meta: serde_json::json!({
                "responseTime": result.response_time,
                "statusCode": result.status_code,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    Open,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "OPEN",
            IncidentStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "OPEN" => IncidentStatus::Open,
            _ => IncidentStatus::Resolved,
        }
    }
}

/// A downtime episode for one monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: i64,
    pub monitor_id: MonitorId,
    pub status: IncidentStatus,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Reserved interval `[range_start, range_end)` with a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlugTicket {
    pub id: i64,
    pub range_start: i64,
    pub range_end: i64,
    pub current_value: i64,
}

impl SlugTicket {
    pub fn is_exhausted(&self) -> bool {
        self.current_value >= self.range_end
    }
}

/// A number drawn from a ticket by one allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketNumber {
    pub ticket_id: i64,
    pub number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecipient {
    pub id: i64,
    pub monitor_id: MonitorId,
    pub email: String,
}
