//! Workflow consumer: deadlines, SLA jobs, and notifications.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use lapor_core::bus::EventHandler;
use lapor_core::domain::CaseStatus;
use lapor_core::events::{types, Event, ReportCreated, ReportStatusUpdated};
use lapor_core::sla::SlaConfig;
use lapor_core::{run_blocking, ServiceError};

use super::store::WorkflowStore;

/// Consumer group of the workflow service.
pub const WORKFLOW_GROUP: &str = "workflow-service";

/// Handles `report.created` and `report.status.updated`; everything else
/// on the stream is ignored.
pub struct WorkflowConsumer {
    store: WorkflowStore,
    sla: Arc<SlaConfig>,
}

impl WorkflowConsumer {
    #[must_use]
    pub fn new(store: WorkflowStore, sla: Arc<SlaConfig>) -> Self {
        Self { store, sla }
    }

    async fn on_created(&self, event: &Event) -> Result<(), ServiceError> {
        let payload: ReportCreated = event.parse_payload()?;
        let due_at = payload.created_at
            + chrono::Duration::from_std(self.sla.get())
                .map_err(|e| ServiceError::Validation(format!("SLA duration overflow: {e}")))?;

        let store = self.store.clone();
        let report_id = payload.report_id;
        let created_at = payload.created_at;
        let reporter = payload.reporter_user_id.clone();
        let inserted = run_blocking(move || {
            store.upsert_projection(
                report_id,
                &reporter,
                CaseStatus::Received.as_str(),
                due_at,
                created_at,
            )?;
            store.insert_sla_job(report_id, due_at, created_at)
        })
        .await?;

        if inserted {
            info!(report_id = %report_id, due_at = %due_at, "SLA job created");
        }
        Ok(())
    }

    async fn on_status_updated(&self, event: &Event) -> Result<(), ServiceError> {
        let payload: ReportStatusUpdated = event.parse_payload()?;
        let resolved = payload.new_status == CaseStatus::Resolved.as_str();

        let store = self.store.clone();
        let report_id = payload.report_id;
        let new_status = payload.new_status.clone();
        let changed_at = payload.changed_at;
        let reporter = run_blocking(move || {
            store.update_projection_status(report_id, &new_status, changed_at)?;
            if resolved {
                store.complete_sla_job(report_id, Utc::now())?;
            }
            store.projection_reporter(report_id)
        })
        .await?;

        if resolved {
            info!(report_id = %report_id, "SLA job completed");
        }

        // Notify the reporter regardless of which transition happened.
        if let Some(reporter) = reporter {
            let message = format!(
                "Your report status has been updated to: {}",
                payload.new_status
            );
            let store = self.store.clone();
            let user = reporter.clone();
            let msg = message.clone();
            run_blocking(move || store.insert_notification(&user, report_id, &msg, Utc::now()))
                .await?;
            debug!(user = %reporter, report_id = %report_id, "Notification created");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for WorkflowConsumer {
    async fn handle(&self, event: &Event) -> Result<(), ServiceError> {
        match event.event_type.as_str() {
            types::REPORT_CREATED => self.on_created(event).await,
            types::REPORT_STATUS_UPDATED => self.on_status_updated(event).await,
            _ => Ok(()),
        }
    }
}
