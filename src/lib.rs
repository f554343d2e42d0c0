//! Uptime monitoring dispatch and incident engine
//!
//! - [`scheduler`] finds due monitors and enqueues one check job per region.
//! - [`ingest`] accepts probe results, keeps history and drives [`incident`].
//! - [`slug`] hands out short public identifiers from ticket ranges.
//! - [`notify`] delivers downtime alerts in the background.
//!
//! Everything persistent goes through [`storage::StorageBackend`].

#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod error;
pub mod incident;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod slug;
pub mod storage;
pub mod util;

pub use error::{EngineError, EngineResult, ErrorKind};
