//! Timestamp formatting for store columns.
//!
//! Store columns hold RFC3339 text with fixed microsecond precision and a
//! `Z` suffix. The fixed width makes lexicographic comparison in SQL
//! (`ORDER BY created_at`, `due_at < ?`) agree with chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ServiceError;

/// Formats a timestamp for a store column.
#[must_use]
pub fn store_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a store column back into a timestamp.
///
/// # Errors
///
/// Returns `ServiceError::Validation` for text that is not RFC3339.
pub fn parse_store_ts(s: &str) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ServiceError::Validation(format!("bad timestamp {s:?}: {e}")))
}
