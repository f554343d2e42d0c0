//! Short public identifiers for monitors
//!
//! Numbers come from pre-provisioned [`SlugTicket`](crate::model::SlugTicket)
//! ranges instead of one global counter, and are rendered in base 62.
//! Assignment happens after the monitor row exists and never blocks or fails
//! monitor creation: [`SlugHandle`] runs it in a background actor.
//!
//! ## Message Flow
//!
//! ```text
//! register_monitor → SlugHandle::assign → SlugActor → SlugAllocator → storage
//!                                              └─ retries, logs pool exhaustion
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use crate::config::SlugConfig;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::{Monitor, MonitorId, NewMonitor};
use crate::storage::{StorageBackend, with_timeout};

const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Encode `n` in base 62 without padding
pub fn encode_base62(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(11);
    while n > 0 {
        digits.push(ALPHABET[(n % 62) as usize]);
        n /= 62;
    }
    digits.reverse();

    // Only ASCII bytes from ALPHABET are pushed
    String::from_utf8(digits).unwrap_or_default()
}

/// Decode a base-62 string produced by [`encode_base62`]
pub fn decode_base62(s: &str) -> EngineResult<u64> {
    if s.is_empty() {
        return Err(EngineError::validation("empty slug"));
    }

    s.bytes().try_fold(0u64, |acc, b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'z' => b - b'a' + 10,
            b'A'..=b'Z' => b - b'A' + 36,
            _ => {
                return Err(EngineError::validation(format!(
                    "invalid base62 character {:?} in {s}",
                    b as char
                )));
            }
        };
        acc.checked_mul(62)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| EngineError::validation(format!("slug {s} overflows u64")))
    })
}

/// Provision the ticket pool if it is empty
///
/// Creates `config.tickets` consecutive ranges of `config.range` numbers
/// starting at `config.start`. Returns how many tickets were created.
#[instrument(skip_all)]
pub async fn seed_tickets(store: &dyn StorageBackend, config: &SlugConfig) -> EngineResult<usize> {
    if !store.tickets().await?.is_empty() {
        debug!("slug tickets already provisioned");
        return Ok(0);
    }

    for i in 0..config.tickets {
        let range_start = config.start + i as i64 * config.range;
        let range_end = range_start + config.range;
        store.create_ticket(range_start, range_end).await?;
        debug!("provisioned slug ticket [{range_start}, {range_end})");
    }

    info!("seeded {} slug tickets", config.tickets);
    Ok(config.tickets as usize)
}

/// Draws ticket numbers and writes slugs
#[derive(Clone)]
pub struct SlugAllocator {
    store: Arc<dyn StorageBackend>,
    db_timeout: Duration,
}

impl SlugAllocator {
    pub fn new(store: Arc<dyn StorageBackend>, db_timeout: Duration) -> Self {
        Self { store, db_timeout }
    }

    /// Assign a slug to `monitor_id`
    ///
    /// A monitor that already has a slug keeps it.
    #[instrument(skip(self))]
    pub async fn assign(&self, monitor_id: MonitorId) -> EngineResult<String> {
        let monitor = with_timeout(self.db_timeout, self.store.get_monitor(monitor_id))
            .await?
            .ok_or_else(|| EngineError::not_found(format!("monitor {monitor_id} not found")))?;

        if let Some(slug) = monitor.slug {
            return Ok(slug);
        }

        let ticket = with_timeout(self.db_timeout, self.store.allocate_ticket())
            .await?
            .ok_or_else(|| EngineError::exhausted("slug ticket pool exhausted"))?;

        let slug = encode_base62(ticket.number as u64);
        let written =
            with_timeout(self.db_timeout, self.store.set_slug(monitor_id, &slug)).await?;

        if !written {
            return Err(EngineError::conflict(format!(
                "monitor {monitor_id} received a slug concurrently"
            )));
        }

        debug!(ticket = ticket.ticket_id, number = ticket.number, "assigned slug {slug}");
        Ok(slug)
    }
}

/// Counters exposed by the slug actor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlugStats {
    pub assigned: u64,
    pub failed: u64,
}

#[derive(Debug)]
enum SlugCommand {
    Assign { monitor_id: MonitorId },
    GetStats { respond_to: oneshot::Sender<SlugStats> },
    Shutdown,
}

/// Retry behaviour for background assignment
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

struct SlugActor {
    allocator: SlugAllocator,
    retry: RetryPolicy,
    command_rx: mpsc::Receiver<SlugCommand>,
    stats: SlugStats,
}

impl SlugActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting slug actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                SlugCommand::Assign { monitor_id } => self.assign_with_retry(monitor_id).await,
                SlugCommand::GetStats { respond_to } => {
                    let _ = respond_to.send(self.stats.clone());
                }
                SlugCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!("slug actor stopped");
    }

    async fn assign_with_retry(&mut self, monitor_id: MonitorId) {
        for attempt in 1..=self.retry.attempts {
            match self.allocator.assign(monitor_id).await {
                Ok(slug) => {
                    info!(monitor_id, "generated slug {slug}");
                    self.stats.assigned += 1;
                    return;
                }
                Err(e) if e.kind() == ErrorKind::ResourceExhausted => {
                    error!(monitor_id, "no slug tickets left, monitor stays without slug: {e}");
                    break;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(monitor_id, "cannot assign slug: {e}");
                    break;
                }
                Err(e) => {
                    warn!(monitor_id, attempt, "slug assignment failed: {e}");
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(self.retry.backoff * attempt).await;
                    }
                }
            }
        }
        self.stats.failed += 1;
    }
}

/// Handle for the background slug actor
#[derive(Clone)]
pub struct SlugHandle {
    sender: mpsc::Sender<SlugCommand>,
}

impl SlugHandle {
    pub fn spawn(allocator: SlugAllocator, retry: RetryPolicy) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = SlugActor {
            allocator,
            retry,
            command_rx: cmd_rx,
            stats: SlugStats::default(),
        };
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Queue a slug assignment without waiting for it
    ///
    /// Returns false if the request could not be queued.
    pub fn assign(&self, monitor_id: MonitorId) -> bool {
        match self.sender.try_send(SlugCommand::Assign { monitor_id }) {
            Ok(()) => true,
            Err(e) => {
                error!(monitor_id, "could not queue slug assignment: {e}");
                false
            }
        }
    }

    /// Stats after every previously queued assignment has been handled
    pub async fn stats(&self) -> anyhow::Result<SlugStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SlugCommand::GetStats { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(SlugCommand::Shutdown).await;
    }
}

/// Create a monitor and queue its slug assignment
///
/// Creation succeeds even if the slug cannot be queued; the monitor then
/// simply has no public identifier yet.
#[instrument(skip(store, slugs, monitor), fields(url = %monitor.url))]
pub async fn register_monitor(
    store: &dyn StorageBackend,
    slugs: &SlugHandle,
    monitor: NewMonitor,
) -> EngineResult<Monitor> {
    monitor.validate()?;
    let monitor = store.insert_monitor(monitor, Utc::now()).await?;

    if !slugs.assign(monitor.id) {
        warn!(monitor_id = monitor.id, "monitor registered without slug");
    }

    Ok(monitor)
}
