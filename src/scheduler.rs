//! Check dispatch
//!
//! Every tick the scheduler loads the monitors that are due, fans each out
//! into one [`CheckJob`] per region, and sends the jobs to the region queues
//! in batches. Afterwards every due monitor gets `last_checked_at = now`,
//! whether or not its jobs were accepted; rejected entries are logged and
//! picked up again once the monitor is due next time.
//!
//! ## Message Flow
//!
//! ```text
//! interval tick ─┐
//!                ├─▶ SchedulerActor ─▶ Scheduler::tick_at ─▶ due_monitors
//! TickNow ───────┘        (one at a time)     │
//!                                             ├─▶ plan_jobs (group by region, chunk)
//!                                             ├─▶ regions in parallel, batches in order
//!                                             └─▶ mark_checked
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{MAX_BATCH_SIZE, SchedulerConfig};
use crate::error::{EngineError, EngineResult};
use crate::model::{CheckJob, Monitor};
use crate::queue::{BatchEntry, QueueError, RegionRegistry};
use crate::storage::{StorageBackend, with_timeout};

/// Jobs for one region, already chunked into batches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPlan {
    pub region: String,
    pub batches: Vec<Vec<BatchEntry>>,
}

impl RegionPlan {
    pub fn job_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

/// Turn due monitors into per-region batches
///
/// Entry ids have the form `<monitorId>-<tickMillis>-<index>` where `index`
/// counts the region's jobs, so ids never repeat within a batch.
pub fn plan_jobs(
    monitors: &[Monitor],
    batch_size: usize,
    tick: DateTime<Utc>,
) -> EngineResult<Vec<RegionPlan>> {
    let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
    let tick_millis = tick.timestamp_millis();

    let mut by_region: BTreeMap<&str, Vec<CheckJob>> = BTreeMap::new();
    for monitor in monitors {
        let regions: BTreeSet<&str> = monitor.regions.iter().map(String::as_str).collect();
        for region in regions {
            by_region
                .entry(region)
                .or_default()
                .push(CheckJob::new(monitor, region));
        }
    }

    by_region
        .into_iter()
        .map(|(region, jobs)| -> EngineResult<RegionPlan> {
            let entries = jobs
                .iter()
                .enumerate()
                .map(|(idx, job)| -> EngineResult<BatchEntry> {
                    let message_body = serde_json::to_string(job).map_err(|e| {
                        EngineError::internal(format!("cannot serialize check job: {e}"))
                    })?;
                    Ok(BatchEntry {
                        id: format!("{}-{tick_millis}-{idx}", job.monitor_id),
                        message_body,
                    })
                })
                .collect::<EngineResult<Vec<_>>>()?;

            Ok(RegionPlan {
                region: region.to_string(),
                batches: entries.chunks(batch_size).map(<[_]>::to_vec).collect(),
            })
        })
        .collect()
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due_monitors: usize,
    pub jobs: usize,
    pub batches: usize,
    pub enqueued: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct RegionReport {
    batches: usize,
    enqueued: usize,
    failed: usize,
}

/// Runs single ticks; see [`SchedulerHandle`] for the periodic driver
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn StorageBackend>,
    regions: RegionRegistry,
    interval_floor: chrono::Duration,
    batch_size: usize,
    send_timeout: Duration,
    db_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        regions: RegionRegistry,
        config: &SchedulerConfig,
        db_timeout: Duration,
    ) -> Self {
        Self {
            store,
            regions,
            interval_floor: config.interval_floor(),
            batch_size: config.batch_size(),
            send_timeout: config.send_timeout(),
            db_timeout,
        }
    }

    pub async fn tick(&self) -> EngineResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Dispatch every monitor due at `now`
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> EngineResult<TickReport> {
        let cutoff = now - self.interval_floor;
        let due = with_timeout(self.db_timeout, self.store.due_monitors(cutoff)).await?;

        if due.is_empty() {
            debug!("no monitors due");
            return Ok(TickReport::default());
        }

        let plan = plan_jobs(&due, self.batch_size, now)?;
        let jobs: usize = plan.iter().map(RegionPlan::job_count).sum();

        let reports = join_all(plan.into_iter().map(|p| self.dispatch_region(p))).await;

        let ids: Vec<_> = due.iter().map(|m| m.id).collect();
        with_timeout(self.db_timeout, self.store.mark_checked(&ids, now)).await?;

        let report = reports.into_iter().fold(
            TickReport {
                due_monitors: due.len(),
                jobs,
                ..TickReport::default()
            },
            |mut acc, r| {
                acc.batches += r.batches;
                acc.enqueued += r.enqueued;
                acc.failed += r.failed;
                acc
            },
        );

        info!(
            "dispatched {} jobs for {} monitors ({} failed)",
            report.enqueued, report.due_monitors, report.failed
        );
        Ok(report)
    }

    /// Send a region's batches one after another
    async fn dispatch_region(&self, plan: RegionPlan) -> RegionReport {
        let mut report = RegionReport::default();

        let Some(queue) = self.regions.get(&plan.region) else {
            report.failed = plan.job_count();
            warn!(
                region = %plan.region,
                "no queue configured, dropping {} jobs",
                report.failed
            );
            return report;
        };

        for batch in plan.batches {
            report.batches += 1;
            let sent = tokio::time::timeout(
                self.send_timeout,
                queue.client.send_batch(&queue.queue_url, &batch),
            )
            .await
            .unwrap_or_else(|_| Err(QueueError::Timeout(self.send_timeout)));

            match sent {
                Ok(outcome) => {
                    report.enqueued += outcome.successful.len();
                    report.failed += outcome.failed.len();
                    for entry in &outcome.failed {
                        warn!(
                            region = %plan.region,
                            entry = %entry.id,
                            "queue rejected job: {} {}",
                            entry.code,
                            entry.message
                        );
                    }
                }
                Err(e) => {
                    report.failed += batch.len();
                    warn!(region = %plan.region, "batch of {} jobs failed: {e}", batch.len());
                }
            }
        }

        report
    }
}

/// Totals across all ticks of a [`SchedulerHandle`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub enqueued: u64,
    pub failed_jobs: u64,
}

#[derive(Debug)]
enum SchedulerCommand {
    TickNow {
        respond_to: oneshot::Sender<EngineResult<TickReport>>,
    },
    GetStats {
        respond_to: oneshot::Sender<SchedulerStats>,
    },
    Shutdown,
}

struct SchedulerActor {
    scheduler: Scheduler,
    period: Duration,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    stats: SchedulerStats,
}

impl SchedulerActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_tick().await {
                        error!("scheduler tick failed: {e}");
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::TickNow { respond_to }) => {
                            debug!("received TickNow command");
                            let _ = respond_to.send(self.run_tick().await);
                        }
                        Some(SchedulerCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                        Some(SchedulerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("scheduler actor stopped");
    }

    async fn run_tick(&mut self) -> EngineResult<TickReport> {
        self.stats.ticks += 1;
        match self.scheduler.tick().await {
            Ok(report) => {
                self.stats.enqueued += report.enqueued as u64;
                self.stats.failed_jobs += report.failed as u64;
                Ok(report)
            }
            Err(e) => {
                self.stats.failed_ticks += 1;
                Err(e)
            }
        }
    }
}

/// Handle for the periodic scheduler
///
/// Ticks run inside a single actor task, so a slow tick delays the next one
/// instead of overlapping with it. Missed intervals are skipped.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the actor; the first scheduled tick happens one `period` from now
    pub fn spawn(scheduler: Scheduler, period: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor {
            scheduler,
            period,
            command_rx: cmd_rx,
            stats: SchedulerStats::default(),
        };
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a tick now, after any tick already in progress
    pub async fn tick_now(&self) -> anyhow::Result<TickReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TickNow { respond_to: tx })
            .await?;
        Ok(rx.await??)
    }

    pub async fn stats(&self) -> anyhow::Result<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStats { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown).await;
    }
}
