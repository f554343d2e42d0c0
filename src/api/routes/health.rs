//! Health check endpoint

use std::collections::HashMap;

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::api::ApiState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// GET /api/v1/health
///
/// 200 when storage answers, 503 otherwise
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let timestamp = chrono::Utc::now().to_rfc3339();

    match state.store.health_check().await {
        Ok(health) if health.healthy => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                storage: health.message,
                timestamp,
                metadata: health.metadata,
            }),
        ),
        Ok(health) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded".to_string(),
                storage: health.message,
                timestamp,
                metadata: health.metadata,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded".to_string(),
                storage: e.to_string(),
                timestamp,
                metadata: HashMap::new(),
            }),
        ),
    }
}
