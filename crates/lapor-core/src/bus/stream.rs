//! `SQLite`-backed stream storage.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::BusError;
use crate::events::Event;

/// Schema for the stream log, group cursors, and pending deliveries.
const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS stream_events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        stream TEXT NOT NULL,
        event_id TEXT NOT NULL UNIQUE,
        event_type TEXT NOT NULL,
        report_id TEXT NOT NULL,
        payload BLOB NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_stream_events_stream
        ON stream_events(stream, seq);

    CREATE TABLE IF NOT EXISTS consumer_groups (
        stream TEXT NOT NULL,
        group_name TEXT NOT NULL,
        cursor INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (stream, group_name)
    );

    CREATE TABLE IF NOT EXISTS pending_entries (
        stream TEXT NOT NULL,
        group_name TEXT NOT NULL,
        seq INTEGER NOT NULL,
        consumer TEXT NOT NULL,
        delivered_at_ms INTEGER NOT NULL,
        delivery_count INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (stream, group_name, seq)
    );

    CREATE INDEX IF NOT EXISTS idx_pending_consumer
        ON pending_entries(stream, group_name, consumer, delivered_at_ms);
";

/// One delivered stream entry.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Position in the log; the acknowledgement key.
    pub seq: i64,
    /// The parsed envelope.
    pub event: Event,
    /// How many times this group has been handed the entry.
    pub delivery_count: i64,
}

/// Handle to the stream log. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct EventStream {
    conn: Arc<Mutex<Connection>>,
}

impl EventStream {
    /// Opens (and if necessary creates) the stream database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Database` if the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory stream. Used by tests and single-process setups.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Database` if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, BusError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, BusError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, BusError> {
        self.conn
            .lock()
            .map_err(|e| BusError::Database(format!("mutex poisoned: {e}")))
    }

    /// Appends an event to `stream`. Returns the assigned sequence number
    /// once the append is durable.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if the envelope cannot be serialized or the
    /// append fails.
    pub fn publish(&self, stream: &str, event: &Event) -> Result<i64, BusError> {
        let payload = event
            .to_json()
            .map_err(|e| BusError::Envelope(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO stream_events
                 (stream, event_id, event_type, report_id, payload, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stream,
                event.event_id.to_string(),
                event.event_type,
                event.report_id.to_string(),
                payload,
                crate::time::store_ts(event.timestamp),
            ],
        )?;
        let seq = conn.last_insert_rowid();

        debug!(
            stream = stream,
            event_type = %event.event_type,
            report_id = %event.report_id,
            seq = seq,
            "Published event"
        );
        Ok(seq)
    }

    /// Creates `group` on `stream` starting at offset 0. Creating a group
    /// that already exists is a success, and never moves its cursor.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Database` on storage failure.
    pub fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO consumer_groups (stream, group_name, cursor, created_at)
             VALUES (?1, ?2, 0, ?3)",
            params![stream, group, crate::time::store_ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Reads the next batch for `consumer` in `group`: first this
    /// consumer's pending entries idle longer than `redeliver_idle`, then
    /// new entries past the group cursor, up to `limit` in total. Every
    /// returned entry is recorded as pending until acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Database` on storage failure; entries whose
    /// stored envelope no longer parses are skipped and acknowledged
    /// implicitly (they can never be handled).
    pub fn read_batch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        limit: usize,
        redeliver_idle: Duration,
    ) -> Result<Vec<StreamMessage>, BusError> {
        let now_ms = Utc::now().timestamp_millis();
        let idle_cutoff = now_ms - i64::try_from(redeliver_idle.as_millis()).unwrap_or(i64::MAX);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut out: Vec<StreamMessage> = Vec::new();

        // Re-claim this consumer's stale pending entries first so a crashed
        // handler sees its unacknowledged work again.
        {
            let mut stmt = tx.prepare(
                "SELECT p.seq, p.delivery_count, e.payload
                 FROM pending_entries p
                 JOIN stream_events e ON e.seq = p.seq
                 WHERE p.stream = ?1 AND p.group_name = ?2 AND p.consumer = ?3
                   AND p.delivered_at_ms <= ?4
                 ORDER BY p.seq ASC
                 LIMIT ?5",
            )?;
            let rows = stmt.query_map(
                params![stream, group, consumer, idle_cutoff, limit as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )?;
            for row in rows {
                let (seq, count, payload) = row?;
                match Event::from_json(&payload) {
                    Ok(event) => out.push(StreamMessage {
                        seq,
                        event,
                        delivery_count: count + 1,
                    }),
                    Err(_) => {
                        tx.execute(
                            "DELETE FROM pending_entries
                             WHERE stream = ?1 AND group_name = ?2 AND seq = ?3",
                            params![stream, group, seq],
                        )?;
                    }
                }
            }
        }
        for msg in &out {
            tx.execute(
                "UPDATE pending_entries
                 SET delivered_at_ms = ?1, delivery_count = delivery_count + 1
                 WHERE stream = ?2 AND group_name = ?3 AND seq = ?4",
                params![now_ms, stream, group, msg.seq],
            )?;
        }

        // Then hand out new entries past the group cursor.
        let remaining = limit.saturating_sub(out.len());
        if remaining > 0 {
            let cursor: i64 = tx
                .query_row(
                    "SELECT cursor FROM consumer_groups WHERE stream = ?1 AND group_name = ?2",
                    params![stream, group],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    BusError::Database(format!("consumer group {group} does not exist"))
                })?;

            let fresh: Vec<(i64, Vec<u8>)> = {
                let mut stmt = tx.prepare(
                    "SELECT seq, payload FROM stream_events
                     WHERE stream = ?1 AND seq > ?2
                     ORDER BY seq ASC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![stream, cursor, remaining as i64],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )?;
                rows.collect::<Result<_, _>>()?
            };

            let mut max_seq = cursor;
            for (seq, payload) in fresh {
                max_seq = max_seq.max(seq);
                match Event::from_json(&payload) {
                    Ok(event) => {
                        tx.execute(
                            "INSERT INTO pending_entries
                                 (stream, group_name, seq, consumer, delivered_at_ms)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![stream, group, seq, consumer, now_ms],
                        )?;
                        out.push(StreamMessage {
                            seq,
                            event,
                            delivery_count: 1,
                        });
                    }
                    // A corrupt envelope can never be handled; skip it and
                    // let the cursor pass over it.
                    Err(err) => {
                        debug!(seq = seq, error = %err, "Skipping unparseable stream entry");
                    }
                }
            }
            if max_seq > cursor {
                tx.execute(
                    "UPDATE consumer_groups SET cursor = ?1
                     WHERE stream = ?2 AND group_name = ?3",
                    params![max_seq, stream, group],
                )?;
            }
        }

        tx.commit()?;
        Ok(out)
    }

    /// Acknowledges one delivery, removing it from the group's pending set.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Database` on storage failure.
    pub fn ack(&self, stream: &str, group: &str, seq: i64) -> Result<(), BusError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM pending_entries
             WHERE stream = ?1 AND group_name = ?2 AND seq = ?3",
            params![stream, group, seq],
        )?;
        Ok(())
    }

    /// Number of delivered-but-unacknowledged entries for `group`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Database` on storage failure.
    pub fn pending_count(&self, stream: &str, group: &str) -> Result<i64, BusError> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM pending_entries WHERE stream = ?1 AND group_name = ?2",
            params![stream, group],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// All events of `event_type` currently in `stream`, oldest first.
    /// Test and tooling helper; consumers go through groups.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Database` on storage failure.
    pub fn events_of_type(&self, stream: &str, event_type: &str) -> Result<Vec<Event>, BusError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM stream_events
             WHERE stream = ?1 AND event_type = ?2
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![stream, event_type], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;

        let mut events = Vec::new();
        for payload in rows {
            if let Ok(event) = Event::from_json(&payload?) {
                events.push(event);
            }
        }
        Ok(events)
    }
}
