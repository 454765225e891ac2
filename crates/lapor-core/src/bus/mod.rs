//! Log-structured event stream with named consumer groups.
//!
//! The bus is an append-only `SQLite` log. Publishing appends an envelope
//! row; consuming reads batches through a named group, which tracks a
//! delivery cursor plus a per-consumer pending table:
//!
//! 1. A read first re-claims this consumer's pending entries whose last
//!    delivery is older than the redelivery idle window, then takes new
//!    entries past the group cursor.
//! 2. Delivered entries are recorded as pending before the read returns.
//! 3. Acknowledgement deletes the pending row.
//!
//! A consumer that dies between handling and acknowledgement therefore
//! sees the entry again on a later read: delivery is at-least-once and
//! handlers must be idempotent. Pending entries belong to the consumer
//! name that read them, so each group runs its consumers under stable
//! names (the instance id) and a restarted instance inherits its own
//! backlog.
//!
//! Batch size, poll block, error backoff, and the redelivery idle window
//! are tunables on [`ConsumerConfig`], not contracts.

mod consumer;
mod stream;


use thiserror::Error;

pub use consumer::{consume, poll_once, ConsumerConfig, EventHandler};
pub use stream::{EventStream, StreamMessage};

use crate::error::ServiceError;

/// Errors surfaced by the bus.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// The underlying log store failed.
    #[error("bus database error: {0}")]
    Database(String),

    /// An envelope could not be serialized or parsed.
    #[error("envelope error: {0}")]
    Envelope(String),

    /// A blocking task running a bus operation was cancelled.
    #[error("bus task join error: {0}")]
    Join(String),
}

impl From<rusqlite::Error> for BusError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<BusError> for ServiceError {
    fn from(err: BusError) -> Self {
        Self::Transport(err.to_string())
    }
}
