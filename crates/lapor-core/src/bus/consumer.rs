//! The consume loop: batch reads, handler dispatch, acknowledgement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::stream::EventStream;
use super::BusError;
use crate::error::ServiceError;
use crate::events::Event;

/// A consumer-side event handler.
///
/// Handlers are invoked once per delivered entry and must be idempotent:
/// the bus is at-least-once and redelivers anything that was not
/// acknowledged. Returning an error leaves the entry pending for
/// redelivery; ignoring an event type it does not care about is `Ok(())`,
/// not an error.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), ServiceError>;
}

/// Tunables of the consume loop. Defaults match the deployed services.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum entries handed out per read.
    pub batch_size: usize,
    /// Sleep between reads when the stream is drained (the poll stands in
    /// for a blocking read on the embedded log).
    pub block_timeout: Duration,
    /// Sleep after a failed read before retrying.
    pub error_backoff: Duration,
    /// How long a delivery may sit unacknowledged before a later read
    /// re-claims it.
    pub redeliver_idle: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            block_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            redeliver_idle: Duration::from_secs(5),
        }
    }
}

/// Reads and handles one batch. Returns the number of entries handled
/// successfully (and therefore acknowledged).
///
/// Split out of [`consume`] so tests and catch-up tooling can drive a
/// consumer deterministically.
///
/// # Errors
///
/// Returns `BusError` when the read itself fails; individual handler
/// failures are logged and leave their entries pending.
pub async fn poll_once(
    stream: &EventStream,
    stream_name: &str,
    group: &str,
    consumer: &str,
    handler: &Arc<dyn EventHandler>,
    config: &ConsumerConfig,
) -> Result<usize, BusError> {
    let batch = {
        let stream = stream.clone();
        let stream_name = stream_name.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();
        let limit = config.batch_size;
        let idle = config.redeliver_idle;
        tokio::task::spawn_blocking(move || {
            stream.read_batch(&stream_name, &group, &consumer, limit, idle)
        })
        .await
        .map_err(|e| BusError::Join(e.to_string()))??
    };

    let mut handled = 0;
    for msg in batch {
        match handler.handle(&msg.event).await {
            Ok(()) => {
                let stream = stream.clone();
                let stream_name = stream_name.to_string();
                let group = group.to_string();
                let seq = msg.seq;
                tokio::task::spawn_blocking(move || stream.ack(&stream_name, &group, seq))
                    .await
                    .map_err(|e| BusError::Join(e.to_string()))??;
                handled += 1;
            }
            Err(err) => {
                // Not acknowledged: the entry is redelivered once its idle
                // window passes.
                warn!(
                    group = group,
                    event_id = %msg.event.event_id,
                    event_type = %msg.event.event_type,
                    delivery_count = msg.delivery_count,
                    error = %err,
                    "Handler failed; leaving entry pending"
                );
            }
        }
    }
    Ok(handled)
}

/// Runs the consume loop until `shutdown` is set.
///
/// Creates the group if it does not exist, then repeatedly reads batches
/// of up to `batch_size`, sleeping `block_timeout` when the stream is
/// drained and backing off `error_backoff` after read failures.
///
/// # Errors
///
/// Returns `BusError` only if the group cannot be created; everything
/// after that is retried in the loop.
pub async fn consume(
    stream: EventStream,
    stream_name: &str,
    group: &str,
    consumer: &str,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    shutdown: Arc<AtomicBool>,
) -> Result<(), BusError> {
    {
        let stream = stream.clone();
        let stream_name = stream_name.to_string();
        let group = group.to_string();
        tokio::task::spawn_blocking(move || stream.ensure_group(&stream_name, &group))
            .await
            .map_err(|e| BusError::Join(e.to_string()))??;
    }

    info!(
        group = group,
        consumer = consumer,
        batch_size = config.batch_size,
        "Consumer loop starting"
    );

    while !shutdown.load(Ordering::Relaxed) {
        match poll_once(&stream, stream_name, group, consumer, &handler, &config).await {
            Ok(0) => tokio::time::sleep(config.block_timeout).await,
            Ok(handled) => {
                debug!(group = group, handled = handled, "Batch handled");
            }
            Err(err) => {
                warn!(group = group, error = %err, "Stream read failed; backing off");
                tokio::time::sleep(config.error_backoff).await;
            }
        }
    }

    info!(group = group, consumer = consumer, "Consumer loop stopped");
    Ok(())
}
