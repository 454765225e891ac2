//! Workflow store: report status projection, SLA jobs, notifications.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use lapor_core::config::{self, ConfigError};
use lapor_core::domain::SlaStatus;
use lapor_core::time::store_ts;
use lapor_core::ServiceError;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS report_status_projection (
        report_id TEXT PRIMARY KEY,
        reporter_user_id TEXT NOT NULL,
        current_status TEXT NOT NULL,
        due_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sla_jobs (
        report_id TEXT PRIMARY KEY,
        due_at TEXT NOT NULL,
        status TEXT NOT NULL,
        escalation_level INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        processed_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_sla_jobs_due
        ON sla_jobs(status, due_at);

    CREATE TABLE IF NOT EXISTS notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        report_id TEXT NOT NULL,
        message TEXT NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_notifications_user
        ON notifications(user_id, created_at);
";

/// An SLA job row.
#[derive(Debug, Clone, Serialize)]
pub struct SlaJobRow {
    pub report_id: String,
    pub due_at: String,
    pub status: String,
    pub escalation_level: i64,
    pub processed_at: Option<String>,
}

/// A row of `GET /sla/status`: the job joined with the projection.
#[derive(Debug, Clone, Serialize)]
pub struct SlaStatusRow {
    pub report_id: String,
    pub due_at: String,
    pub sla_status: String,
    pub escalation_level: i64,
    pub current_status: Option<String>,
    pub is_overdue: bool,
}

/// A notification row.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRow {
    pub id: i64,
    pub report_id: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

/// Handle to the workflow store.
#[derive(Clone)]
pub struct WorkflowStore {
    conn: Arc<Mutex<Connection>>,
}

impl WorkflowStore {
    /// Opens the store at `path`, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Open` when the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            conn: config::open_store(path, SCHEMA_SQL)?,
        })
    }

    /// Wraps an existing connection (tests, shared in-process setups).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` if the schema cannot be applied.
    pub fn from_connection(conn: Connection) -> Result<Self, ServiceError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ServiceError> {
        self.conn
            .lock()
            .map_err(|e| ServiceError::Transport(format!("mutex poisoned: {e}")))
    }

    /// Upserts the per-report projection. On conflict only the status and
    /// update timestamp move; the reporter and deadline stay.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn upsert_projection(
        &self,
        report_id: Uuid,
        reporter_user_id: &str,
        current_status: &str,
        due_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO report_status_projection
                 (report_id, reporter_user_id, current_status, due_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (report_id) DO UPDATE SET
                 current_status = excluded.current_status,
                 updated_at = excluded.updated_at",
            params![
                report_id.to_string(),
                reporter_user_id,
                current_status,
                store_ts(due_at),
                store_ts(created_at),
            ],
        )?;
        Ok(())
    }

    /// Updates only the projection's status and timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn update_projection_status(
        &self,
        report_id: Uuid,
        new_status: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE report_status_projection
             SET current_status = ?1, updated_at = ?2
             WHERE report_id = ?3",
            params![new_status, store_ts(changed_at), report_id.to_string()],
        )?;
        Ok(())
    }

    /// The reporter behind a projected report, for notification fan-out.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn projection_reporter(&self, report_id: Uuid) -> Result<Option<String>, ServiceError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT reporter_user_id FROM report_status_projection WHERE report_id = ?1",
                params![report_id.to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Creates the PENDING SLA job, ignoring duplicates. Returns true when
    /// the job was new.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn insert_sla_job(
        &self,
        report_id: Uuid,
        due_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO sla_jobs
                 (report_id, due_at, status, escalation_level, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                report_id.to_string(),
                store_ts(due_at),
                SlaStatus::Pending.as_str(),
                store_ts(created_at),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Marks the job COMPLETED. COMPLETED is terminal regardless of the
    /// previous status, so an escalated job that later resolves also
    /// closes here.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn complete_sla_job(
        &self,
        report_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sla_jobs SET status = ?1, processed_at = ?2 WHERE report_id = ?3",
            params![
                SlaStatus::Completed.as_str(),
                store_ts(processed_at),
                report_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// PENDING jobs whose deadline has passed, with their current level.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` on storage failure or a corrupt report id.
    pub fn overdue_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, i64)>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT report_id, escalation_level FROM sla_jobs
             WHERE status = ?1 AND due_at < ?2
             ORDER BY due_at ASC",
        )?;
        let rows = stmt.query_map(
            params![SlaStatus::Pending.as_str(), store_ts(now)],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (id, level) = row?;
            let id = Uuid::parse_str(&id)
                .map_err(|e| ServiceError::Transport(format!("corrupt report id {id:?}: {e}")))?;
            out.push((id, level));
        }
        Ok(out)
    }

    /// Escalates one job: level bump, status ESCALATED, processed-at now.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn escalate_job(
        &self,
        report_id: Uuid,
        new_level: i64,
        processed_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sla_jobs
             SET status = ?1, escalation_level = ?2, processed_at = ?3
             WHERE report_id = ?4",
            params![
                SlaStatus::Escalated.as_str(),
                new_level,
                store_ts(processed_at),
                report_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// One job by report id.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn sla_job(&self, report_id: Uuid) -> Result<Option<SlaJobRow>, ServiceError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT report_id, due_at, status, escalation_level, processed_at
                 FROM sla_jobs WHERE report_id = ?1",
                params![report_id.to_string()],
                |row| {
                    Ok(SlaJobRow {
                        report_id: row.get(0)?,
                        due_at: row.get(1)?,
                        status: row.get(2)?,
                        escalation_level: row.get(3)?,
                        processed_at: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    /// Jobs joined with their projection, soonest deadline first.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn sla_status(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SlaStatusRow>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.report_id, s.due_at, s.status, s.escalation_level, p.current_status
             FROM sla_jobs s
             LEFT JOIN report_status_projection p ON s.report_id = p.report_id
             ORDER BY s.due_at ASC
             LIMIT ?1",
        )?;
        let now = store_ts(now);
        let rows = stmt.query_map(params![limit], |row| {
            let due_at: String = row.get(1)?;
            let sla_status: String = row.get(2)?;
            let is_overdue = sla_status == "PENDING" && due_at < now;
            Ok(SlaStatusRow {
                report_id: row.get(0)?,
                due_at,
                sla_status,
                escalation_level: row.get(3)?,
                current_status: row.get(4)?,
                is_overdue,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Appends a notification (unread).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn insert_notification(
        &self,
        user_id: &str,
        report_id: Uuid,
        message: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications (user_id, report_id, message, is_read, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id, report_id.to_string(), message, store_ts(created_at)],
        )?;
        Ok(())
    }

    /// Newest notifications for one user.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn notifications_for(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<NotificationRow>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, report_id, message, is_read, created_at
             FROM notifications
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            Ok(NotificationRow {
                id: row.get(0)?,
                report_id: row.get(1)?,
                message: row.get(2)?,
                is_read: row.get::<_, i64>(3)? != 0,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
