//! Error types for storage operations

use std::time::Duration;

use crate::error::EngineError;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database connection failed
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// Database query failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    /// Referenced row does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write
    #[error("constraint violated: {0}")]
    Conflict(String),

    /// Column serialization/deserialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The call did not complete within its deadline
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::RowNotFound => StorageError::NotFound("no rows found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::Conflict(db_err.message().to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => EngineError::not_found(msg),
            StorageError::Conflict(msg) => EngineError::conflict(msg),
            StorageError::Timeout(_) | StorageError::ConnectionFailed(_) => {
                EngineError::dependency(err.to_string())
            }
            other => EngineError::internal(other.to_string()),
        }
    }
}
