//! Per-replica read model and its idempotent apply pipeline.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;
use uuid::Uuid;

use lapor_core::config::{self, ConfigError};
use lapor_core::domain::CaseStatus;
use lapor_core::events::{
    types, Event, ReportCreated, ReportDeleted, ReportStatusUpdated, ReportUpdated,
};
use lapor_core::time::store_ts;
use lapor_core::ServiceError;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS reports_read_model (
        id TEXT PRIMARY KEY,
        reporter_user_id TEXT NOT NULL,
        visibility TEXT NOT NULL,
        content TEXT NOT NULL,
        category TEXT NOT NULL,
        category_lower TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_read_model_category
        ON reports_read_model(category_lower);
    CREATE INDEX IF NOT EXISTS idx_read_model_status
        ON reports_read_model(status);

    CREATE TABLE IF NOT EXISTS report_statistics (
        category TEXT NOT NULL,
        status TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (category, status)
    );

    CREATE TABLE IF NOT EXISTS processed_events (
        event_id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        processed_at TEXT NOT NULL
    );
";

/// One read replica.
#[derive(Clone)]
pub struct ReplicaStore {
    conn: Arc<Mutex<Connection>>,
    /// Identifies the replica in logs and error messages.
    label: String,
}

impl ReplicaStore {
    /// Opens the replica at `path`, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Open` when the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            conn: config::open_store(path, SCHEMA_SQL)?,
            label: path.display().to_string(),
        })
    }

    /// Wraps an existing connection (tests, shared in-process setups).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` if the schema cannot be applied.
    pub fn from_connection(conn: Connection, label: impl Into<String>) -> Result<Self, ServiceError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label: label.into(),
        })
    }

    /// The replica's log label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ServiceError> {
        self.conn
            .lock()
            .map_err(|e| ServiceError::Transport(format!("mutex poisoned: {e}")))
    }

    /// Runs the transactional apply pipeline for one event. Returns false
    /// when the event id was already in the ledger (idempotent skip).
    ///
    /// The ledger row commits in the same transaction as the apply, so a
    /// failure rolls both back and the event stays retryable.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` when the transaction cannot complete; the
    /// caller treats that as this replica failing the event.
    pub fn apply(&self, event: &Event) -> Result<bool, ServiceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ServiceError::from)?;

        let already: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM processed_events WHERE event_id = ?1",
                params![event.event_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            debug!(replica = %self.label, event_id = %event.event_id, "Already applied; skipping");
            return Ok(false);
        }

        match event.event_type.as_str() {
            types::REPORT_CREATED => Self::apply_created(&tx, event)?,
            types::REPORT_UPDATED => Self::apply_updated(&tx, event)?,
            types::REPORT_DELETED => Self::apply_deleted(&tx, event)?,
            types::REPORT_STATUS_UPDATED => Self::apply_status_updated(&tx, event)?,
            // Recognized but projection-irrelevant; still enters the
            // ledger below so redeliveries stay cheap.
            _ => {}
        }

        tx.execute(
            "INSERT INTO processed_events (event_id, event_type, processed_at)
             VALUES (?1, ?2, ?3)",
            params![
                event.event_id.to_string(),
                event.event_type,
                store_ts(Utc::now()),
            ],
        )?;
        tx.commit().map_err(ServiceError::from)?;
        Ok(true)
    }

    fn apply_created(tx: &Transaction<'_>, event: &Event) -> Result<(), ServiceError> {
        let payload: ReportCreated = event.parse_payload()?;
        let created = store_ts(payload.created_at);
        tx.execute(
            "INSERT INTO reports_read_model
                 (id, reporter_user_id, visibility, content, category, category_lower,
                  status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (id) DO UPDATE SET
                 reporter_user_id = excluded.reporter_user_id,
                 visibility = excluded.visibility,
                 content = excluded.content,
                 category = excluded.category,
                 category_lower = excluded.category_lower,
                 updated_at = excluded.updated_at",
            params![
                payload.report_id.to_string(),
                payload.reporter_user_id,
                payload.visibility,
                payload.content,
                payload.category,
                payload.category.to_lowercase(),
                CaseStatus::Received.as_str(),
                created,
            ],
        )?;
        increment_counter(tx, &payload.category, CaseStatus::Received.as_str())
    }

    fn apply_updated(tx: &Transaction<'_>, event: &Event) -> Result<(), ServiceError> {
        let payload: ReportUpdated = event.parse_payload()?;
        let Some((old_category, old_status)) = row_meta(tx, payload.report_id)? else {
            // Nothing to revise on this replica yet; a redelivered create
            // will seed it first.
            return Ok(());
        };

        tx.execute(
            "UPDATE reports_read_model
             SET content = ?1, category = ?2, category_lower = ?3, status = ?4,
                 updated_at = ?5
             WHERE id = ?6",
            params![
                payload.content,
                payload.category,
                payload.category.to_lowercase(),
                payload.status,
                store_ts(payload.updated_at),
                payload.report_id.to_string(),
            ],
        )?;

        if old_status != payload.status || old_category != payload.category {
            decrement_counter(tx, &old_category, &old_status)?;
            increment_counter(tx, &payload.category, &payload.status)?;
        }
        Ok(())
    }

    fn apply_deleted(tx: &Transaction<'_>, event: &Event) -> Result<(), ServiceError> {
        let payload: ReportDeleted = event.parse_payload()?;
        let Some((category, status)) = row_meta(tx, payload.report_id)? else {
            return Ok(());
        };

        tx.execute(
            "DELETE FROM reports_read_model WHERE id = ?1",
            params![payload.report_id.to_string()],
        )?;
        decrement_counter(tx, &category, &status)
    }

    fn apply_status_updated(tx: &Transaction<'_>, event: &Event) -> Result<(), ServiceError> {
        let payload: ReportStatusUpdated = event.parse_payload()?;
        let Some((category, old_status)) = row_meta(tx, payload.report_id)? else {
            return Ok(());
        };
        if old_status == payload.new_status {
            return Ok(());
        }

        tx.execute(
            "UPDATE reports_read_model SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                payload.new_status,
                store_ts(payload.changed_at),
                payload.report_id.to_string(),
            ],
        )?;
        decrement_counter(tx, &category, &old_status)?;
        increment_counter(tx, &category, &payload.new_status)
    }

    /// Number of live read-model rows with `(category, status)`. Test and
    /// convergence-check helper.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn live_rows(&self, category: &str, status: &str) -> Result<i64, ServiceError> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM reports_read_model WHERE category = ?1 AND status = ?2",
            params![category, status],
            |row| row.get(0),
        )?)
    }

    /// Current counter value for `(category, status)`; zero when absent.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn counter(&self, category: &str, status: &str) -> Result<i64, ServiceError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT count FROM report_statistics WHERE category = ?1 AND status = ?2",
                params![category, status],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0))
    }

    /// Whether the ledger holds `event_id`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn has_processed(&self, event_id: Uuid) -> Result<bool, ServiceError> {
        let conn = self.lock()?;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_events WHERE event_id = ?1",
                params![event_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }
}

fn row_meta(
    tx: &Transaction<'_>,
    report_id: Uuid,
) -> Result<Option<(String, String)>, ServiceError> {
    Ok(tx
        .query_row(
            "SELECT category, status FROM reports_read_model WHERE id = ?1",
            params![report_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn increment_counter(
    tx: &Transaction<'_>,
    category: &str,
    status: &str,
) -> Result<(), ServiceError> {
    tx.execute(
        "INSERT INTO report_statistics (category, status, count, updated_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT (category, status) DO UPDATE SET
             count = report_statistics.count + 1,
             updated_at = excluded.updated_at",
        params![category, status, store_ts(Utc::now())],
    )?;
    Ok(())
}

/// Decrements clamp at zero so a stray delete can never drive a counter
/// negative.
fn decrement_counter(
    tx: &Transaction<'_>,
    category: &str,
    status: &str,
) -> Result<(), ServiceError> {
    tx.execute(
        "UPDATE report_statistics
         SET count = MAX(count - 1, 0), updated_at = ?3
         WHERE category = ?1 AND status = ?2",
        params![category, status, store_ts(Utc::now())],
    )?;
    Ok(())
}
