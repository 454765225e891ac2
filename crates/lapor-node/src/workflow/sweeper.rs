//! Periodic SLA breach sweeper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use lapor_core::bus::EventStream;
use lapor_core::events::{types, Event, ReportEscalated, STREAM_NAME};
use lapor_core::{run_blocking, ServiceError};

use super::store::WorkflowStore;

/// Fixed sweep period.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(30);

/// One sweep: escalate every overdue PENDING job and publish
/// `report.escalated` per breach. Returns the number of breaches.
///
/// A job is escalated before its event is published, so a crash between
/// the two can lose the event but never double-escalates; the job itself
/// leaves the PENDING pool either way.
///
/// # Errors
///
/// Returns `ServiceError` when the overdue query fails. Per-job failures
/// are logged and skipped so one bad row cannot stall the sweep.
pub async fn sweep_once(
    store: &WorkflowStore,
    stream: &EventStream,
) -> Result<usize, ServiceError> {
    let now = Utc::now();
    let breaches = {
        let store = store.clone();
        run_blocking(move || store.overdue_pending(now)).await?
    };

    for &(report_id, level) in &breaches {
        let new_level = level + 1;
        info!(
            report_id = %report_id,
            escalation_level = new_level,
            "SLA breach detected"
        );

        {
            let store = store.clone();
            if let Err(err) =
                run_blocking(move || store.escalate_job(report_id, new_level, now)).await
            {
                warn!(report_id = %report_id, error = %err, "Escalation update failed");
                continue;
            }
        }

        let event = Event::new(
            types::REPORT_ESCALATED,
            report_id,
            &ReportEscalated {
                report_id,
                reason: "SLA_BREACH".into(),
                escalation_level: new_level,
            },
        );
        match event {
            Ok(event) => {
                let stream = stream.clone();
                if let Err(err) = run_blocking(move || {
                    stream
                        .publish(STREAM_NAME, &event)
                        .map_err(ServiceError::from)
                })
                .await
                {
                    warn!(report_id = %report_id, error = %err, "Escalation publish failed");
                }
            }
            Err(err) => warn!(report_id = %report_id, error = %err, "Could not construct event"),
        }
    }

    if !breaches.is_empty() {
        info!(count = breaches.len(), "Processed SLA breaches");
    }
    Ok(breaches.len())
}

/// Runs the sweeper until `shutdown` is set, ticking every
/// [`SWEEP_PERIOD`].
pub async fn run_sweeper(
    store: WorkflowStore,
    stream: EventStream,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) {
    info!(period_secs = period.as_secs(), "SLA sweeper starting");
    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(period).await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if let Err(err) = sweep_once(&store, &stream).await {
            warn!(error = %err, "Sweep failed");
        }
    }
    info!("SLA sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn fixtures() -> (WorkflowStore, EventStream) {
        let store =
            WorkflowStore::from_connection(rusqlite::Connection::open_in_memory().unwrap())
                .unwrap();
        let stream = EventStream::open_in_memory().unwrap();
        (store, stream)
    }

    #[tokio::test]
    async fn overdue_job_escalates_once_and_publishes() {
        let (store, stream) = fixtures();
        let now = Utc::now();
        let report_id = Uuid::new_v4();
        store
            .insert_sla_job(report_id, now - ChronoDuration::seconds(5), now)
            .unwrap();

        let first = sweep_once(&store, &stream).await.unwrap();
        assert_eq!(first, 1);

        let job = store.sla_job(report_id).unwrap().unwrap();
        assert_eq!(job.status, "ESCALATED");
        assert_eq!(job.escalation_level, 1);

        let events = stream
            .events_of_type(STREAM_NAME, types::REPORT_ESCALATED)
            .unwrap();
        assert_eq!(events.len(), 1);
        let payload: ReportEscalated = events[0].parse_payload().unwrap();
        assert_eq!(payload.escalation_level, 1);
        assert_eq!(payload.reason, "SLA_BREACH");

        // A later sweep does not re-escalate: the job left the PENDING pool.
        let second = sweep_once(&store, &stream).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            stream
                .events_of_type(STREAM_NAME, types::REPORT_ESCALATED)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn jobs_inside_their_deadline_are_left_alone() {
        let (store, stream) = fixtures();
        let now = Utc::now();
        store
            .insert_sla_job(Uuid::new_v4(), now + ChronoDuration::seconds(60), now)
            .unwrap();

        assert_eq!(sweep_once(&store, &stream).await.unwrap(), 0);
        assert!(stream
            .events_of_type(STREAM_NAME, types::REPORT_ESCALATED)
            .unwrap()
            .is_empty());
    }
}
