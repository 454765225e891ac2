//! Consumer keeping the submitter's feed in step with officer actions.

use async_trait::async_trait;
use tracing::debug;

use lapor_core::bus::EventHandler;
use lapor_core::events::{types, Event, ReportStatusUpdated};
use lapor_core::{run_blocking, ServiceError};

use super::store::CitizenStore;

/// Consumer group of the citizen service.
pub const REPORTING_GROUP: &str = "reporting-service";

/// Applies `report.status.updated` to `my_reports_view`. Everything else
/// on the stream is ignored.
pub struct StatusFeedConsumer {
    store: CitizenStore,
}

impl StatusFeedConsumer {
    #[must_use]
    pub fn new(store: CitizenStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for StatusFeedConsumer {
    async fn handle(&self, event: &Event) -> Result<(), ServiceError> {
        if event.event_type != types::REPORT_STATUS_UPDATED {
            return Ok(());
        }
        let payload: ReportStatusUpdated = event.parse_payload()?;

        debug!(
            report_id = %payload.report_id,
            new_status = %payload.new_status,
            "Updating submitter feed"
        );

        let store = self.store.clone();
        run_blocking(move || {
            store.apply_status_update(payload.report_id, &payload.new_status, payload.changed_at)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lapor_core::domain::{Report, Visibility};
    use uuid::Uuid;

    fn consumer_with_report() -> (StatusFeedConsumer, CitizenStore, Report) {
        let store =
            CitizenStore::from_connection(rusqlite::Connection::open_in_memory().unwrap())
                .unwrap();
        let report = Report::new("citizen1", Visibility::Public, "Jalan rusak", "infrastruktur");
        store.insert_report(&report).unwrap();
        store.seed_views(&report).unwrap();
        (StatusFeedConsumer::new(store.clone()), store, report)
    }

    fn status_event(report_id: Uuid, new_status: &str) -> Event {
        Event::new(
            types::REPORT_STATUS_UPDATED,
            report_id,
            &ReportStatusUpdated {
                report_id,
                old_status: "RECEIVED".into(),
                new_status: new_status.into(),
                owner_agency: "AGENCY_INFRA".into(),
                changed_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn status_update_reaches_the_feed() {
        let (consumer, store, report) = consumer_with_report();
        consumer
            .handle(&status_event(report.report_id, "IN_PROGRESS"))
            .await
            .unwrap();

        let mine = store.my_reports("citizen1", 100).unwrap();
        assert_eq!(mine[0].current_status, "IN_PROGRESS");
    }

    #[tokio::test]
    async fn unrelated_events_are_ignored() {
        let (consumer, store, report) = consumer_with_report();
        let event = Event::new(
            types::REPORT_UPVOTED,
            report.report_id,
            &lapor_core::events::ReportUpvoted {
                report_id: report.report_id,
                voter_user_id: "citizen2".into(),
                created_at: Utc::now(),
            },
        )
        .unwrap();

        consumer.handle(&event).await.unwrap();
        let mine = store.my_reports("citizen1", 100).unwrap();
        assert_eq!(mine[0].current_status, "RECEIVED");
    }
}
