//! Case router: `report.created` → agency inbox row.

use async_trait::async_trait;
use tracing::info;

use lapor_core::bus::EventHandler;
use lapor_core::domain::agency_for_category;
use lapor_core::events::{types, Event, ReportCreated};
use lapor_core::{run_blocking, ServiceError};

use super::store::OperationsStore;

/// Consumer group of the operations service.
pub const OPERATIONS_GROUP: &str = "operations-service";

/// Routes new reports into the owning agency's inbox. All other event
/// types are ignored.
pub struct CaseRouter {
    store: OperationsStore,
}

impl CaseRouter {
    #[must_use]
    pub fn new(store: OperationsStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for CaseRouter {
    async fn handle(&self, event: &Event) -> Result<(), ServiceError> {
        if event.event_type != types::REPORT_CREATED {
            return Ok(());
        }
        let payload: ReportCreated = event.parse_payload()?;
        let owner_agency = agency_for_category(&payload.category);

        let store = self.store.clone();
        let inserted = run_blocking(move || {
            store.insert_case(
                payload.report_id,
                owner_agency,
                &payload.content,
                &payload.reporter_user_id,
                &payload.visibility,
                payload.created_at,
            )
        })
        .await?;

        if inserted {
            info!(
                report_id = %event.report_id,
                agency = owner_agency,
                "Case created"
            );
        }
        Ok(())
    }
}
