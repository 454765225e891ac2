//! Operations store: cases and their status history.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use lapor_core::config::{self, ConfigError};
use lapor_core::domain::CaseStatus;
use lapor_core::time::store_ts;
use lapor_core::ServiceError;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS cases (
        report_id TEXT PRIMARY KEY,
        owner_agency TEXT NOT NULL,
        status TEXT NOT NULL,
        content TEXT NOT NULL,
        reporter_user_id TEXT NOT NULL,
        visibility TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_cases_agency
        ON cases(owner_agency, created_at);

    CREATE TABLE IF NOT EXISTS case_status_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        report_id TEXT NOT NULL,
        old_status TEXT NOT NULL,
        new_status TEXT NOT NULL,
        changed_by TEXT NOT NULL,
        changed_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_report
        ON case_status_history(report_id);
";

/// An inbox row as served to officers.
#[derive(Debug, Clone, Serialize)]
pub struct CaseRow {
    pub report_id: String,
    pub owner_agency: String,
    pub status: String,
    pub content: String,
    pub reporter_user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One appended history entry.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub report_id: String,
    pub old_status: String,
    pub new_status: String,
    pub changed_by: String,
    pub changed_at: String,
}

/// Handle to the operations store.
#[derive(Clone)]
pub struct OperationsStore {
    conn: Arc<Mutex<Connection>>,
}

impl OperationsStore {
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

    /// Inserts a routed case in RECEIVED state, ignoring duplicates.
    /// Returns true when the row was new. This conflict-ignore is the
    /// router's whole idempotency story.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn insert_case(
        &self,
        report_id: Uuid,
        owner_agency: &str,
        content: &str,
        reporter_user_id: &str,
        visibility: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO cases
                 (report_id, owner_agency, status, content, reporter_user_id,
                  visibility, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                report_id.to_string(),
                owner_agency,
                CaseStatus::Received.as_str(),
                content,
                reporter_user_id,
                visibility,
                store_ts(created_at),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Owner agency and current status of a case.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn case_meta(&self, report_id: Uuid) -> Result<Option<(String, String)>, ServiceError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT owner_agency, status FROM cases WHERE report_id = ?1",
                params![report_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    /// Transitions a case and appends the history row in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn transition_case(
        &self,
        report_id: Uuid,
        old_status: &str,
        new_status: CaseStatus,
        changed_by: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ServiceError::from)?;
        let id = report_id.to_string();
        let at = store_ts(changed_at);
        tx.execute(
            "UPDATE cases SET status = ?1, updated_at = ?2 WHERE report_id = ?3",
            params![new_status.as_str(), at, id],
        )?;
        tx.execute(
            "INSERT INTO case_status_history
                 (report_id, old_status, new_status, changed_by, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, old_status, new_status.as_str(), changed_by, at],
        )?;
        tx.commit().map_err(ServiceError::from)
    }

    /// Agency inbox, newest first. Reporters of anonymous reports are
    /// masked.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn inbox(&self, agency: &str) -> Result<Vec<CaseRow>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT report_id, owner_agency, status, content, reporter_user_id,
                    visibility, created_at, updated_at
             FROM cases
             WHERE owner_agency = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![agency], |row| {
            let visibility: String = row.get(5)?;
            let reporter: String = row.get(4)?;
            Ok(CaseRow {
                report_id: row.get(0)?,
                owner_agency: row.get(1)?,
                status: row.get(2)?,
                content: row.get(3)?,
                reporter_user_id: if visibility == "ANONYMOUS" {
                    "[ANONYMOUS]".to_string()
                } else {
                    reporter
                },
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// History of one case, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn history(&self, report_id: Uuid) -> Result<Vec<HistoryRow>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT report_id, old_status, new_status, changed_by, changed_at
             FROM case_status_history
             WHERE report_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![report_id.to_string()], |row| {
            Ok(HistoryRow {
                report_id: row.get(0)?,
                old_status: row.get(1)?,
                new_status: row.get(2)?,
                changed_by: row.get(3)?,
                changed_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OperationsStore {
        OperationsStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn duplicate_case_insert_is_ignored() {
        let store = store();
        let id = Uuid::new_v4();
        let now = Utc::now();

        assert!(store
            .insert_case(id, "AGENCY_INFRA", "Jalan rusak", "citizen1", "PUBLIC", now)
            .unwrap());
        assert!(!store
            .insert_case(id, "AGENCY_INFRA", "Jalan rusak", "citizen1", "PUBLIC", now)
            .unwrap());
        assert_eq!(store.inbox("AGENCY_INFRA").unwrap().len(), 1);
    }

    #[test]
    fn transition_appends_history_atomically() {
        let store = store();
        let id = Uuid::new_v4();
        store
            .insert_case(id, "AGENCY_INFRA", "Jalan rusak", "citizen1", "PUBLIC", Utc::now())
            .unwrap();

        store
            .transition_case(id, "RECEIVED", CaseStatus::InProgress, "officer1", Utc::now())
            .unwrap();

        let (_, status) = store.case_meta(id).unwrap().unwrap();
        assert_eq!(status, "IN_PROGRESS");

        let history = store.history(id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, "RECEIVED");
        assert_eq!(history[0].new_status, "IN_PROGRESS");
        assert_eq!(history[0].changed_by, "officer1");
    }

    #[test]
    fn inbox_masks_anonymous_reporters() {
        let store = store();
        store
            .insert_case(
                Uuid::new_v4(),
                "AGENCY_SAFETY",
                "Rahasia",
                "citizen2",
                "ANONYMOUS",
                Utc::now(),
            )
            .unwrap();

        let inbox = store.inbox("AGENCY_SAFETY").unwrap();
        assert_eq!(inbox[0].reporter_user_id, "[ANONYMOUS]");
        // Content is still shown to the owning agency.
        assert_eq!(inbox[0].content, "Rahasia");
    }

    #[test]
    fn inbox_is_scoped_by_agency() {
        let store = store();
        store
            .insert_case(Uuid::new_v4(), "AGENCY_INFRA", "a", "c1", "PUBLIC", Utc::now())
            .unwrap();
        store
            .insert_case(Uuid::new_v4(), "AGENCY_HEALTH", "b", "c2", "PUBLIC", Utc::now())
            .unwrap();

        assert_eq!(store.inbox("AGENCY_INFRA").unwrap().len(), 1);
        assert_eq!(store.inbox("AGENCY_HEALTH").unwrap().len(), 1);
        assert!(store.inbox("AGENCY_SAFETY").unwrap().is_empty());
    }
}
