//! Bearer token authentication middleware

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::error::ApiError;
use crate::error::{EngineError, ErrorKind};

/// Authentication middleware
///
/// Checks for the internal secret as a Bearer token. Any missing or wrong
/// token is answered with 403.
pub async fn auth_middleware(
    State(expected_token): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?;

    if token != expected_token {
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => "Missing Authorization header",
            AuthError::InvalidFormat => "Invalid Authorization format (expected: Bearer <token>)",
            AuthError::InvalidToken => "Invalid token",
        };

        ApiError(EngineError::new(ErrorKind::Unauthorized, message)).into_response()
    }
}
