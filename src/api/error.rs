//! API error types and conversions

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::error::{EngineError, ErrorKind};

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Engine error rendered as `{status: "error", code, message, details?}`
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if err.kind() == ErrorKind::Internal {
            error!("request failed: {err}");
        }

        let mut body = json!({
            "status": "error",
            "code": err.kind().code(),
            "message": err.message(),
        });
        if let Some(details) = err.details() {
            body["details"] = details.clone();
        }

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(err: crate::storage::StorageError) -> Self {
        ApiError(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(
            EngineError::validation("Invalid input")
                .with_details(json!({ "reason": rejection.body_text() })),
        )
    }
}
