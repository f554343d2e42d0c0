//! Monitor registration and alert recipients

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{ApiResult, ApiState};
use crate::error::EngineError;
use crate::model::{AlertRecipient, HttpMethod, Incident, Monitor, MonitorId, NewMonitor};
use crate::notify::add_alert_recipient;
use crate::slug::register_monitor;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonitorRequest {
    pub user_id: i64,
    pub website_name: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Seconds
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default)]
    pub is_paused: bool,
    pub regions: Vec<String>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

fn default_expected_status() -> u16 {
    200
}

fn default_interval() -> u32 {
    180
}

fn default_timeout() -> u32 {
    5000
}

impl From<CreateMonitorRequest> for NewMonitor {
    fn from(req: CreateMonitorRequest) -> Self {
        NewMonitor {
            user_id: req.user_id,
            website_name: req.website_name,
            url: req.url,
            method: req.method,
            expected_status: req.expected_status,
            interval_secs: req.interval,
            timeout_ms: req.timeout,
            is_paused: req.is_paused,
            regions: req.regions,
            last_checked_at: req.last_checked_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDetail {
    pub monitor: Monitor,
    pub open_incidents: Vec<Incident>,
}

#[derive(Debug, Deserialize)]
pub struct AddRecipientRequest {
    pub email: String,
}

/// POST /api/v1/monitors
///
/// The slug is assigned in the background and shows up on later reads.
pub async fn create_monitor(
    State(state): State<ApiState>,
    payload: Result<Json<CreateMonitorRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Monitor>)> {
    let Json(request) = payload?;
    let monitor = register_monitor(state.store.as_ref(), &state.slugs, request.into()).await?;
    Ok((StatusCode::CREATED, Json(monitor)))
}

/// GET /api/v1/monitors/:id
pub async fn get_monitor(
    State(state): State<ApiState>,
    Path(id): Path<MonitorId>,
) -> ApiResult<Json<MonitorDetail>> {
    let monitor = state
        .store
        .get_monitor(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("Monitor {id} not found")))?;
    let open_incidents = state.store.open_incidents(id).await?;

    Ok(Json(MonitorDetail {
        monitor,
        open_incidents,
    }))
}

/// POST /api/v1/monitors/:id/recipients
pub async fn add_recipient(
    State(state): State<ApiState>,
    Path(id): Path<MonitorId>,
    payload: Result<Json<AddRecipientRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AlertRecipient>)> {
    let Json(request) = payload?;
    let recipient = add_alert_recipient(state.store.as_ref(), id, &request.email).await?;
    Ok((StatusCode::CREATED, Json(recipient)))
}
