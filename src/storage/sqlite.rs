//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the single writer
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Concurrency
//!
//! SQLite admits one writer at a time. Ticket allocation is a single
//! `UPDATE … RETURNING` statement and result ingestion opens its transaction
//! with a write, so both are serialised by the database lock rather than by
//! anything in this process. A second hub pointed at the same file gets the
//! same guarantees.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, IngestOutcome, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::incident::{self, Transition};
use crate::model::{
    AlertRecipient, CheckResult, Incident, IncidentStatus, LogLevel, Monitor, MonitorId,
    MonitorLog, MonitorResult, NewMonitor, NewMonitorLog, SlugTicket, TicketNumber,
};

const MONITOR_COLUMNS: &str = "id, user_id, website_name, url, method, expected_status, \
     interval_secs, timeout_ms, is_paused, is_deleted, regions, slug, last_checked_at, created_at";

const INCIDENT_COLUMNS: &str =
    "id, monitor_id, status, summary, started_at, resolved_at, last_notified_at";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for concurrent access (WAL mode, busy timeout)
    ///
    /// ```no_run
    /// # use upwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./upwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }
}

fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

fn monitor_from_row(row: &SqliteRow) -> StorageResult<Monitor> {
    let method: String = row.try_get("method")?;
    let regions: String = row.try_get("regions")?;

    Ok(Monitor {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        website_name: row.try_get("website_name")?,
        url: row.try_get("url")?,
        method: method
            .parse()
            .map_err(|e: crate::error::EngineError| StorageError::SerializationError(e.to_string()))?,
        expected_status: row.try_get::<i64, _>("expected_status")? as u16,
        interval_secs: row.try_get::<i64, _>("interval_secs")? as u32,
        timeout_ms: row.try_get::<i64, _>("timeout_ms")? as u32,
        is_paused: row.try_get("is_paused")?,
        is_deleted: row.try_get("is_deleted")?,
        regions: serde_json::from_str(&regions)?,
        slug: row.try_get("slug")?,
        last_checked_at: row
            .try_get::<Option<i64>, _>("last_checked_at")?
            .map(from_millis),
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn incident_from_row(row: &SqliteRow) -> StorageResult<Incident> {
    let status: String = row.try_get("status")?;

    Ok(Incident {
        id: row.try_get("id")?,
        monitor_id: row.try_get("monitor_id")?,
        status: IncidentStatus::parse(&status),
        summary: row.try_get("summary")?,
        started_at: from_millis(row.try_get("started_at")?),
        resolved_at: row.try_get::<Option<i64>, _>("resolved_at")?.map(from_millis),
        last_notified_at: row
            .try_get::<Option<i64>, _>("last_notified_at")?
            .map(from_millis),
    })
}

fn ticket_from_row(row: &SqliteRow) -> StorageResult<SlugTicket> {
    Ok(SlugTicket {
        id: row.try_get("id")?,
        range_start: row.try_get("range_start")?,
        range_end: row.try_get("range_end")?,
        current_value: row.try_get("current_value")?,
    })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, monitor), fields(url = %monitor.url))]
    async fn insert_monitor(
        &self,
        monitor: NewMonitor,
        now: DateTime<Utc>,
    ) -> StorageResult<Monitor> {
        let regions = serde_json::to_string(&monitor.regions)?;

        let result = sqlx::query(
            r#"
            INSERT INTO monitors (
                user_id, website_name, url, method, expected_status, interval_secs,
                timeout_ms, is_paused, is_deleted, regions, last_checked_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(monitor.user_id)
        .bind(&monitor.website_name)
        .bind(&monitor.url)
        .bind(monitor.method.as_str())
        .bind(monitor.expected_status as i64)
        .bind(monitor.interval_secs as i64)
        .bind(monitor.timeout_ms as i64)
        .bind(monitor.is_paused)
        .bind(regions)
        .bind(monitor.last_checked_at.as_ref().map(to_millis))
        .bind(to_millis(&now))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("inserted monitor {id}");

        self.get_monitor(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("monitor {id} vanished after insert")))
    }

    async fn get_monitor(&self, id: MonitorId) -> StorageResult<Option<Monitor>> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(monitor_from_row).transpose()
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn due_monitors(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<Monitor>> {
        let sql = format!(
            r#"
            SELECT {MONITOR_COLUMNS}
            FROM monitors
            WHERE is_paused = 0
              AND is_deleted = 0
              AND (last_checked_at IS NULL OR last_checked_at <= ?)
            ORDER BY id ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(to_millis(&cutoff))
            .fetch_all(&self.pool)
            .await?;

        let monitors = rows
            .iter()
            .map(monitor_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("{} monitors due", monitors.len());
        Ok(monitors)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn mark_checked(&self, ids: &[MonitorId], at: DateTime<Utc>) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let at_millis = to_millis(&at);
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for id in ids {
            let result = sqlx::query("UPDATE monitors SET last_checked_at = ? WHERE id = ?")
                .bind(at_millis)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn set_slug(&self, id: MonitorId, slug: &str) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE monitors SET slug = ? WHERE id = ? AND slug IS NULL")
            .bind(slug)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_recipient(
        &self,
        monitor_id: MonitorId,
        email: &str,
    ) -> StorageResult<AlertRecipient> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_recipients (monitor_id, email)
            SELECT ?, ? WHERE EXISTS (SELECT 1 FROM monitors WHERE id = ?)
            "#,
        )
        .bind(monitor_id)
        .bind(email)
        .bind(monitor_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("monitor {monitor_id}")));
        }

        Ok(AlertRecipient {
            id: result.last_insert_rowid(),
            monitor_id,
            email: email.to_string(),
        })
    }

    async fn recipients(&self, monitor_id: MonitorId) -> StorageResult<Vec<AlertRecipient>> {
        let rows = sqlx::query(
            "SELECT id, monitor_id, email FROM alert_recipients WHERE monitor_id = ? ORDER BY id",
        )
        .bind(monitor_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StorageResult<AlertRecipient> {
                Ok(AlertRecipient {
                    id: row.try_get("id")?,
                    monitor_id: row.try_get("monitor_id")?,
                    email: row.try_get("email")?,
                })
            })
            .collect()
    }

    async fn create_ticket(&self, range_start: i64, range_end: i64) -> StorageResult<SlugTicket> {
        let result = sqlx::query(
            "INSERT INTO slug_tickets (range_start, range_end, current_value) VALUES (?, ?, ?)",
        )
        .bind(range_start)
        .bind(range_end)
        .bind(range_start)
        .execute(&self.pool)
        .await?;

        Ok(SlugTicket {
            id: result.last_insert_rowid(),
            range_start,
            range_end,
            current_value: range_start,
        })
    }

    async fn tickets(&self) -> StorageResult<Vec<SlugTicket>> {
        let rows = sqlx::query(
            "SELECT id, range_start, range_end, current_value FROM slug_tickets ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ticket_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn allocate_ticket(&self) -> StorageResult<Option<TicketNumber>> {
        // Selection and increment are one statement; the guard on
        // current_value keeps a concurrently exhausted ticket from overflowing.
        let row = sqlx::query(
            r#"
            UPDATE slug_tickets
            SET current_value = current_value + 1
            WHERE id = (
                SELECT id FROM slug_tickets
                WHERE current_value < range_end
                ORDER BY RANDOM()
                LIMIT 1
            )
              AND current_value < range_end
            RETURNING id, current_value - 1 AS number
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StorageResult<TicketNumber> {
            Ok(TicketNumber {
                ticket_id: row.try_get("id")?,
                number: row.try_get("number")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, result), fields(monitor_id = result.monitor_id, region = %result.region))]
    async fn ingest_result(
        &self,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> StorageResult<IngestOutcome> {
        let now_millis = to_millis(&now);
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock for the whole
        // transaction, which serialises concurrent ingests.
        let inserted = sqlx::query(
            r#"
            INSERT INTO monitor_results (
                monitor_id, region, is_up, status_code, response_time_ms, error_message, checked_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM monitors WHERE id = ?)
            "#,
        )
        .bind(result.monitor_id)
        .bind(&result.region)
        .bind(result.is_up)
        .bind(result.status_code)
        .bind(result.response_time as i64)
        .bind(&result.error_message)
        .bind(now_millis)
        .bind(result.monitor_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "monitor {} not found",
                result.monitor_id
            )));
        }
        let result_id = inserted.last_insert_rowid();

        let last_checked_at: Option<i64> =
            sqlx::query_scalar("SELECT last_checked_at FROM monitors WHERE id = ?")
                .bind(result.monitor_id)
                .fetch_one(&mut *tx)
                .await?;

        let log = NewMonitorLog::from_result(result);
        sqlx::query(
            r#"
            INSERT INTO monitor_logs (monitor_id, region, level, message, meta, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.monitor_id)
        .bind(&result.region)
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(serde_json::to_string(&log.meta)?)
        .bind(now_millis)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE monitor_id = ? AND status = 'OPEN' ORDER BY id"
        );
        let open = sqlx::query(&sql)
            .bind(result.monitor_id)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(incident_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        let decision = incident::decide(
            result.is_up,
            &result.region,
            &open,
            last_checked_at.map(from_millis),
            now,
        );
        let notified_at = decision.notify.then_some(now);

        let (incident, opened, resolved) = match decision.transition {
            Transition::Unchanged => (None, false, Vec::new()),
            Transition::Open { summary } => {
                let created = sqlx::query(
                    r#"
                    INSERT INTO incidents (monitor_id, status, summary, started_at, last_notified_at)
                    VALUES (?, 'OPEN', ?, ?, ?)
                    "#,
                )
                .bind(result.monitor_id)
                .bind(&summary)
                .bind(now_millis)
                .bind(notified_at.as_ref().map(to_millis))
                .execute(&mut *tx)
                .await?;

                let incident = Incident {
                    id: created.last_insert_rowid(),
                    monitor_id: result.monitor_id,
                    status: IncidentStatus::Open,
                    summary,
                    started_at: now,
                    resolved_at: None,
                    last_notified_at: notified_at,
                };
                (Some(incident), true, Vec::new())
            }
            Transition::Continue { incident_id } => {
                if decision.notify {
                    sqlx::query("UPDATE incidents SET last_notified_at = ? WHERE id = ?")
                        .bind(now_millis)
                        .bind(incident_id)
                        .execute(&mut *tx)
                        .await?;
                }
                let incident = open.into_iter().find(|i| i.id == incident_id).map(|mut i| {
                    if notified_at.is_some() {
                        i.last_notified_at = notified_at;
                    }
                    i
                });
                (incident, false, Vec::new())
            }
            Transition::Resolve { incident_ids } => {
                sqlx::query(
                    r#"
                    UPDATE incidents
                    SET status = 'RESOLVED', resolved_at = ?
                    WHERE monitor_id = ? AND status = 'OPEN'
                    "#,
                )
                .bind(now_millis)
                .bind(result.monitor_id)
                .execute(&mut *tx)
                .await?;
                (None, false, incident_ids)
            }
        };

        sqlx::query("UPDATE monitors SET last_checked_at = ? WHERE id = ?")
            .bind(now_millis)
            .bind(result.monitor_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(IngestOutcome {
            result_id,
            incident,
            opened,
            resolved,
            notify: decision.notify,
        })
    }

    async fn open_incidents(&self, monitor_id: MonitorId) -> StorageResult<Vec<Incident>> {
        let sql = format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE monitor_id = ? AND status = 'OPEN' ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(monitor_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(incident_from_row).collect()
    }

    async fn incidents(&self, monitor_id: MonitorId) -> StorageResult<Vec<Incident>> {
        let sql =
            format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE monitor_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(monitor_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(incident_from_row).collect()
    }

    async fn latest_results(
        &self,
        monitor_id: MonitorId,
        limit: usize,
    ) -> StorageResult<Vec<MonitorResult>> {
        let rows = sqlx::query(
            r#"
            SELECT id, monitor_id, region, is_up, status_code, response_time_ms,
                   error_message, checked_at
            FROM monitor_results
            WHERE monitor_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(monitor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StorageResult<MonitorResult> {
                Ok(MonitorResult {
                    id: row.try_get("id")?,
                    monitor_id: row.try_get("monitor_id")?,
                    region: row.try_get("region")?,
                    is_up: row.try_get("is_up")?,
                    status_code: row.try_get("status_code")?,
                    response_time_ms: row.try_get::<i64, _>("response_time_ms")? as u64,
                    error_message: row.try_get("error_message")?,
                    checked_at: from_millis(row.try_get("checked_at")?),
                })
            })
            .collect()
    }

    async fn latest_logs(
        &self,
        monitor_id: MonitorId,
        limit: usize,
    ) -> StorageResult<Vec<MonitorLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, monitor_id, region, level, message, meta, created_at
            FROM monitor_logs
            WHERE monitor_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(monitor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StorageResult<MonitorLog> {
                let level: String = row.try_get("level")?;
                let meta: String = row.try_get("meta")?;
                Ok(MonitorLog {
                    id: row.try_get("id")?,
                    monitor_id: row.try_get("monitor_id")?,
                    region: row.try_get("region")?,
                    level: LogLevel::parse(&level),
                    message: row.try_get("message")?,
                    meta: serde_json::from_str(&meta)?,
                    created_at: from_millis(row.try_get("created_at")?),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
