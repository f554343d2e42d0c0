//! Probe result submission

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Serialize;
use serde_json::json;

use crate::api::{ApiResult, ApiState};
use crate::error::EngineError;
use crate::model::CheckResult;

#[derive(Debug, Serialize)]
pub struct SaveResultResponse {
    pub status: String,
    pub message: String,
}

/// POST /api/v1/results
///
/// Body: `{monitorId, region, statusCode?, isUp, responseTime, errorMessage?}`
pub async fn save_result(
    State(state): State<ApiState>,
    payload: Result<Json<CheckResult>, JsonRejection>,
) -> ApiResult<Json<SaveResultResponse>> {
    let Json(result) = payload?;

    result.validate().map_err(|e| {
        EngineError::validation("Invalid input").with_details(json!({ "reason": e.message() }))
    })?;

    state.ingestor.ingest(result).await?;

    Ok(Json(SaveResultResponse {
        status: "success".to_string(),
        message: "Monitor result saved".to_string(),
    }))
}
