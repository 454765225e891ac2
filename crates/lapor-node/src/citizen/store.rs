//! Citizen write store: authoritative reports and votes plus the two
//! submitter-facing read views.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use lapor_core::config::{self, ConfigError};
use lapor_core::domain::{CaseStatus, Report, Visibility};
use lapor_core::time::store_ts;
use lapor_core::ServiceError;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        report_id TEXT PRIMARY KEY,
        reporter_user_id TEXT NOT NULL,
        visibility TEXT NOT NULL,
        content TEXT NOT NULL,
        category TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS votes (
        report_id TEXT NOT NULL,
        voter_user_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (report_id, voter_user_id)
    );

    CREATE TABLE IF NOT EXISTS my_reports_view (
        report_id TEXT PRIMARY KEY,
        reporter_user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        visibility TEXT NOT NULL,
        current_status TEXT NOT NULL,
        vote_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_status_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_my_reports_reporter
        ON my_reports_view(reporter_user_id, created_at);

    CREATE TABLE IF NOT EXISTS public_reports_view (
        report_id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        category TEXT NOT NULL,
        vote_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
";

/// A row of the submitter's own feed.
#[derive(Debug, Clone, Serialize)]
pub struct MyReportRow {
    pub report_id: String,
    pub content: String,
    pub visibility: String,
    pub current_status: String,
    pub vote_count: i64,
    pub last_status_at: String,
    pub created_at: String,
}

/// A row of the public feed.
#[derive(Debug, Clone, Serialize)]
pub struct PublicReportRow {
    pub report_id: String,
    pub content: String,
    pub category: String,
    pub vote_count: i64,
    pub created_at: String,
}

/// Handle to the citizen write store.
#[derive(Clone)]
pub struct CitizenStore {
    conn: Arc<Mutex<Connection>>,
}

impl CitizenStore {
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

    /// Inserts the authoritative report row.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Conflict` for a duplicate id, `Transport`
    /// for storage failures.
    pub fn insert_report(&self, report: &Report) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reports
                 (report_id, reporter_user_id, visibility, content, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                report.report_id.to_string(),
                report.reporter_user_id,
                report.visibility.as_str(),
                report.content,
                report.category,
                store_ts(report.created_at),
            ],
        )?;
        Ok(())
    }

    /// Seeds the submitter's view (and the public view for PUBLIC
    /// reports) in RECEIVED state. Conflict-ignoring so request retries
    /// and racing consumers cannot fail it.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn seed_views(&self, report: &Report) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        let created = store_ts(report.created_at);
        conn.execute(
            "INSERT OR IGNORE INTO my_reports_view
                 (report_id, reporter_user_id, content, visibility, current_status,
                  vote_count, created_at, last_status_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![
                report.report_id.to_string(),
                report.reporter_user_id,
                report.content,
                report.visibility.as_str(),
                CaseStatus::Received.as_str(),
                created,
            ],
        )?;
        if report.visibility == Visibility::Public {
            conn.execute(
                "INSERT OR IGNORE INTO public_reports_view
                     (report_id, content, category, vote_count, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![
                    report.report_id.to_string(),
                    report.content,
                    report.category,
                    created,
                ],
            )?;
        }
        Ok(())
    }

    /// Visibility of a report, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` on storage failure or a corrupt stored
    /// value.
    pub fn report_visibility(&self, report_id: Uuid) -> Result<Option<Visibility>, ServiceError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT visibility FROM reports WHERE report_id = ?1",
                params![report_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|v| Visibility::parse(&v)).transpose()
    }

    /// Records a vote, ignoring duplicates. Returns true when the vote was
    /// new.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn record_vote(
        &self,
        report_id: Uuid,
        voter_user_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO votes (report_id, voter_user_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                report_id.to_string(),
                voter_user_id,
                store_ts(created_at),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Recomputes the vote count from the authoritative table into both
    /// read views.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn refresh_vote_counts(&self, report_id: Uuid) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        let id = report_id.to_string();
        conn.execute(
            "UPDATE my_reports_view
             SET vote_count = (SELECT COUNT(*) FROM votes WHERE report_id = ?1)
             WHERE report_id = ?1",
            params![id],
        )?;
        conn.execute(
            "UPDATE public_reports_view
             SET vote_count = (SELECT COUNT(*) FROM votes WHERE report_id = ?1)
             WHERE report_id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// The submitter's feed, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn my_reports(
        &self,
        reporter_user_id: &str,
        limit: i64,
    ) -> Result<Vec<MyReportRow>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT report_id, content, visibility, current_status, vote_count,
                    last_status_at, created_at
             FROM my_reports_view
             WHERE reporter_user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![reporter_user_id, limit], |row| {
            Ok(MyReportRow {
                report_id: row.get(0)?,
                content: row.get(1)?,
                visibility: row.get(2)?,
                current_status: row.get(3)?,
                vote_count: row.get(4)?,
                last_status_at: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// The public feed, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn public_reports(&self, limit: i64) -> Result<Vec<PublicReportRow>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT report_id, content, category, vote_count, created_at
             FROM public_reports_view
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(PublicReportRow {
                report_id: row.get(0)?,
                content: row.get(1)?,
                category: row.get(2)?,
                vote_count: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Applies an officer status change to the submitter's view. A missing
    /// row is a no-op; the inline seed or a later redelivery fills it.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn apply_status_update(
        &self,
        report_id: Uuid,
        new_status: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE my_reports_view
             SET current_status = ?1, last_status_at = ?2
             WHERE report_id = ?3",
            params![new_status, store_ts(changed_at), report_id.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CitizenStore {
        CitizenStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn public_report() -> Report {
        Report::new("citizen1", Visibility::Public, "Jalan rusak", "infrastruktur")
    }

    #[test]
    fn insert_and_seed_populate_both_views() {
        let store = store();
        let report = public_report();
        store.insert_report(&report).unwrap();
        store.seed_views(&report).unwrap();

        let mine = store.my_reports("citizen1", 100).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].current_status, "RECEIVED");
        assert_eq!(mine[0].vote_count, 0);

        let public = store.public_reports(50).unwrap();
        assert_eq!(public.len(), 1);
    }

    #[test]
    fn anonymous_reports_stay_out_of_the_public_feed() {
        let store = store();
        let report = Report::new("citizen2", Visibility::Anonymous, "Rahasia", "keamanan");
        store.insert_report(&report).unwrap();
        store.seed_views(&report).unwrap();

        assert_eq!(store.my_reports("citizen2", 100).unwrap().len(), 1);
        assert!(store.public_reports(50).unwrap().is_empty());
    }

    #[test]
    fn duplicate_votes_collapse_to_one() {
        let store = store();
        let report = public_report();
        store.insert_report(&report).unwrap();
        store.seed_views(&report).unwrap();

        let now = Utc::now();
        assert!(store.record_vote(report.report_id, "citizen2", now).unwrap());
        assert!(!store.record_vote(report.report_id, "citizen2", now).unwrap());
        store.refresh_vote_counts(report.report_id).unwrap();

        let mine = store.my_reports("citizen1", 100).unwrap();
        assert_eq!(mine[0].vote_count, 1);
        let public = store.public_reports(50).unwrap();
        assert_eq!(public[0].vote_count, 1);
    }

    #[test]
    fn seed_is_idempotent() {
        let store = store();
        let report = public_report();
        store.insert_report(&report).unwrap();
        store.seed_views(&report).unwrap();
        store.seed_views(&report).unwrap();

        assert_eq!(store.my_reports("citizen1", 100).unwrap().len(), 1);
        assert_eq!(store.public_reports(50).unwrap().len(), 1);
    }

    #[test]
    fn status_update_lands_in_the_feed() {
        let store = store();
        let report = public_report();
        store.insert_report(&report).unwrap();
        store.seed_views(&report).unwrap();

        store
            .apply_status_update(report.report_id, "IN_PROGRESS", Utc::now())
            .unwrap();
        let mine = store.my_reports("citizen1", 100).unwrap();
        assert_eq!(mine[0].current_status, "IN_PROGRESS");
    }

    #[test]
    fn visibility_lookup_distinguishes_missing_reports() {
        let store = store();
        let report = public_report();
        store.insert_report(&report).unwrap();

        assert_eq!(
            store.report_visibility(report.report_id).unwrap(),
            Some(Visibility::Public)
        );
        assert_eq!(store.report_visibility(Uuid::new_v4()).unwrap(), None);
    }
}
