//! Storage backends for monitors, results, incidents and slug tickets
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: all operations are async for use from Tokio tasks
//! - **Transactional**: result ingestion and ticket allocation are atomic
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database with embedded migrations
//! - **In-Memory**: no persistence, for tests and throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use upwatch::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./upwatch.db").await?;
//!     let health = backend.health_check().await?;
//!     println!("{}", health.message);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use backend::{HealthStatus, IngestOutcome, StorageBackend, with_timeout};
pub use error::{StorageError, StorageResult};
