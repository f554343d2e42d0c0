//! Error kinds shared by the scheduler, ingestor and slug allocator
//!
//! Every failure is an [`EngineError`] tagged with an [`ErrorKind`]. Callers
//! decide what to do by looking at the kind (e.g. the API layer picks the HTTP
//! status from it), never by downcasting.

use serde_json::Value;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced monitor or ticket does not exist
    NotFound,

    /// Malformed job or result payload
    Validation,

    /// Caller did not present the shared secret
    Unauthorized,

    /// No eligible slug ticket is left in the pool
    ResourceExhausted,

    /// Queue send rejected or timed out, notifier failed, database timed out
    DependencyFailure,

    /// Concurrent modification detected
    Conflict,

    /// Anything else
    Internal,
}

impl ErrorKind {
    /// HTTP status code associated with this kind
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 403,
            ErrorKind::ResourceExhausted => 503,
            ErrorKind::DependencyFailure => 502,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }

    /// Stable machine-readable code
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Unauthorized => "FORBIDDEN",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::DependencyFailure => "DEPENDENCY_FAILURE",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Tagged engine error carrying optional structured details
#[derive(Debug, thiserror::Error)]
#[error("{}: {message}", kind.code())]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyFailure, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Status code derived from the kind
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}
