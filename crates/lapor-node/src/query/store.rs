//! Read access to the replica read models.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use lapor_core::config::{self, ConfigError};
use lapor_core::ServiceError;

/// The query side shares the replica schema; opening applies it
/// idempotently so a fresh replica is still readable.
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

    CREATE TABLE IF NOT EXISTS report_statistics (
        category TEXT NOT NULL,
        status TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (category, status)
    );
";

/// A master read-model row.
#[derive(Debug, Clone, Serialize)]
pub struct ReadModelRow {
    pub id: String,
    pub reporter_user_id: String,
    pub visibility: String,
    pub content: String,
    pub category: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Aggregated statistics for one category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryStats {
    pub category: String,
    pub total_count: i64,
    pub received_count: i64,
    pub in_progress_count: i64,
    pub resolved_count: i64,
}

/// Filters of the master list.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    /// Case-insensitive category match.
    pub category: Option<String>,
    /// Exact status match.
    pub status: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Round-robin read access over the replica set.
#[derive(Clone)]
pub struct QueryStore {
    replicas: Vec<Arc<Mutex<Connection>>>,
    next: Arc<AtomicUsize>,
}

impl QueryStore {
    /// Opens every replica path. At least one must open.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when no replica can be opened.
    pub fn open(paths: &[impl AsRef<Path>]) -> Result<Self, ConfigError> {
        let mut replicas = Vec::new();
        let mut last_err = None;
        for path in paths {
            match config::open_store(path.as_ref(), SCHEMA_SQL) {
                Ok(conn) => replicas.push(conn),
                Err(err) => {
                    tracing::warn!(path = %path.as_ref().display(), error = %err,
                                   "Skipping unreachable replica");
                    last_err = Some(err);
                }
            }
        }
        match (replicas.is_empty(), last_err) {
            (true, Some(err)) => Err(err),
            (true, None) => Err(ConfigError::Invalid {
                var: "DB_PATHS",
                value: "no replica paths configured".into(),
            }),
            (false, _) => Ok(Self {
                replicas,
                next: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Wraps existing connections (tests, shared in-process setups).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` when the set is empty or a schema cannot be
    /// applied.
    pub fn from_connections(conns: Vec<Connection>) -> Result<Self, ServiceError> {
        if conns.is_empty() {
            return Err(ServiceError::Validation("no replicas".into()));
        }
        let mut replicas = Vec::new();
        for conn in conns {
            conn.execute_batch(SCHEMA_SQL)?;
            replicas.push(Arc::new(Mutex::new(conn)));
        }
        Ok(Self {
            replicas,
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Picks the next replica round-robin.
    fn replica(&self) -> Result<MutexGuard<'_, Connection>, ServiceError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
        self.replicas[idx]
            .lock()
            .map_err(|e| ServiceError::Transport(format!("mutex poisoned: {e}")))
    }

    /// The filtered master list plus its total count.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<(Vec<ReadModelRow>, i64), ServiceError> {
        let conn = self.replica()?;

        let mut conditions = String::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(category) = &filter.category {
            conditions.push_str(" AND category_lower = ?");
            args.push(category.to_lowercase());
        }
        if let Some(status) = &filter.status {
            conditions.push_str(" AND status = ?");
            args.push(status.clone());
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM reports_read_model WHERE 1=1{conditions}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT id, reporter_user_id, visibility, content, category, status,
                    created_at, updated_at
             FROM reports_read_model
             WHERE 1=1{conditions}
             ORDER BY created_at DESC
             LIMIT ? OFFSET ?"
        );
        args.push(filter.limit.to_string());
        args.push(filter.offset.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(ReadModelRow {
                id: row.get(0)?,
                reporter_user_id: row.get(1)?,
                visibility: row.get(2)?,
                content: row.get(3)?,
                category: row.get(4)?,
                status: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?;

        Ok((rows.collect::<Result<_, _>>()?, total))
    }

    /// One report by id.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn report_by_id(&self, id: Uuid) -> Result<Option<ReadModelRow>, ServiceError> {
        let conn = self.replica()?;
        Ok(conn
            .query_row(
                "SELECT id, reporter_user_id, visibility, content, category, status,
                        created_at, updated_at
                 FROM reports_read_model WHERE id = ?1",
                rusqlite::params![id.to_string()],
                |row| {
                    Ok(ReadModelRow {
                        id: row.get(0)?,
                        reporter_user_id: row.get(1)?,
                        visibility: row.get(2)?,
                        content: row.get(3)?,
                        category: row.get(4)?,
                        status: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?)
    }

    /// Per-category statistics aggregated from the counter table.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Transport` on storage failure.
    pub fn statistics(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<CategoryStats>, ServiceError> {
        let conn = self.replica()?;
        let (sql, args): (&str, Vec<String>) = match category {
            Some(c) => (
                "SELECT category, status, count FROM report_statistics
                 WHERE LOWER(category) = ?
                 ORDER BY category, status",
                vec![c.to_lowercase()],
            ),
            None => (
                "SELECT category, status, count FROM report_statistics
                 ORDER BY category, status",
                Vec::new(),
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats: Vec<CategoryStats> = Vec::new();
        for row in rows {
            let (category, status, count) = row?;
            let idx = match stats.iter().position(|s| s.category == category) {
                Some(idx) => idx,
                None => {
                    stats.push(CategoryStats {
                        category: category.clone(),
                        ..CategoryStats::default()
                    });
                    stats.len() - 1
                }
            };
            let entry = &mut stats[idx];
            entry.total_count += count;
            match status.as_str() {
                "RECEIVED" => entry.received_count = count,
                "IN_PROGRESS" => entry.in_progress_count = count,
                "RESOLVED" => entry.resolved_count = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}
