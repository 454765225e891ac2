//! Citizen-facing service: report submission, upvotes, and the
//! submitter's own feeds.
//!
//! The command path writes the authoritative report first, seeds the
//! submitter's read views inline so the dashboard is current immediately,
//! and then publishes `report.created`. Seed and publish failures are
//! logged but never fail the request — the report is already durable, and
//! the downstream consumers converge the views.
//!
//! The module's consumer (group `reporting-service`) folds officer status
//! changes back into `my_reports_view`.

mod consumer;
mod handlers;
mod store;

pub use consumer::{StatusFeedConsumer, REPORTING_GROUP};
pub use handlers::{
    create_report, my_reports, public_reports, router, upvote_report, CitizenState,
    CreateReportRequest,
};
pub use store::{CitizenStore, MyReportRow, PublicReportRow};
