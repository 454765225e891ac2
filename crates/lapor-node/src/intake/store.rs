//! Intake write model.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use lapor_core::config::{self, ConfigError};
use lapor_core::time::store_ts;
use lapor_core::ServiceError;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        report_id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        category TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

/// One intake report row.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeReportRow {
    pub report_id: String,
    pub content: String,
    pub category: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Handle to the intake write model.
#[derive(Clone)]
pub struct IntakeStore {
    conn: Arc<Mutex<Connection>>,
}

impl IntakeStore {
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

    /// Inserts a new intake report.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Conflict` for a duplicate id, `Transport`
    /// for storage failures.
    pub fn insert(
        &self,
        report_id: Uuid,
        content: &str,
        category: &str,
        status: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reports (report_id, content, category, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                report_id.to_string(),
                content,
                category,
                status,
                store_ts(created_at),
            ],
        )?;
        Ok(())
    }

    /// Applies a partial revision and returns the resulting row, or
    /// `None` when the report does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn update(
        &self,
        report_id: Uuid,
        content: Option<&str>,
        category: Option<&str>,
        status: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<IntakeReportRow>, ServiceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ServiceError::from)?;
        let id = report_id.to_string();

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM reports WHERE report_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        tx.execute(
            "UPDATE reports SET
                 content = COALESCE(?1, content),
                 category = COALESCE(?2, category),
                 status = COALESCE(?3, status),
                 updated_at = ?4
             WHERE report_id = ?5",
            params![content, category, status, store_ts(updated_at), id],
        )?;

        let row = tx.query_row(
            "SELECT report_id, content, category, status, created_at, updated_at
             FROM reports WHERE report_id = ?1",
            params![id],
            |row| {
                Ok(IntakeReportRow {
                    report_id: row.get(0)?,
                    content: row.get(1)?,
                    category: row.get(2)?,
                    status: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )?;
        tx.commit().map_err(ServiceError::from)?;
        Ok(Some(row))
    }

    /// Deletes a report. Returns true when a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn delete(&self, report_id: Uuid) -> Result<bool, ServiceError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM reports WHERE report_id = ?1",
            params![report_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// One report by id.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn get(&self, report_id: Uuid) -> Result<Option<IntakeReportRow>, ServiceError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT report_id, content, category, status, created_at, updated_at
                 FROM reports WHERE report_id = ?1",
                params![report_id.to_string()],
                |row| {
                    Ok(IntakeReportRow {
                        report_id: row.get(0)?,
                        content: row.get(1)?,
                        category: row.get(2)?,
                        status: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> IntakeStore {
        IntakeStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn partial_update_keeps_untouched_fields() {
        let store = store();
        let id = Uuid::new_v4();
        store
            .insert(id, "Jalan rusak", "infrastruktur", "RECEIVED", Utc::now())
            .unwrap();

        let row = store
            .update(id, None, None, Some("IN_PROGRESS"), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(row.content, "Jalan rusak");
        assert_eq!(row.category, "infrastruktur");
        assert_eq!(row.status, "IN_PROGRESS");
    }

    #[test]
    fn update_of_missing_report_returns_none() {
        let store = store();
        assert!(store
            .update(Uuid::new_v4(), Some("x"), None, None, Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_reports_whether_a_row_was_removed() {
        let store = store();
        let id = Uuid::new_v4();
        store
            .insert(id, "Jalan rusak", "infrastruktur", "RECEIVED", Utc::now())
            .unwrap();

        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
    }
}
