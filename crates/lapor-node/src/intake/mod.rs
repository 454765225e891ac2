//! Intake service: operator-entered reports and corrections.
//!
//! Call-center and walk-in reports enter here instead of the citizen
//! app. The service keeps its own write model and publishes the same
//! unified vocabulary: creations as `report.created` (so routing,
//! workflow, and projection treat them exactly like citizen reports),
//! revisions as `report.updated`, removals as `report.deleted`.

mod handlers;
mod store;

pub use handlers::{router, CreateIntakeRequest, IntakeState, UpdateIntakeRequest};
pub use store::{IntakeReportRow, IntakeStore};
