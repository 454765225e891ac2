//! Operations service: officer case handling and the case router.
//!
//! The router (group `operations-service`) turns every `report.created`
//! into an agency inbox row, keyed by report id with a conflict-ignoring
//! insert so redelivery is harmless. Officers then work the case through
//! `PATCH /cases/{id}/status`, which is gated on the case's owner agency
//! and publishes `report.status.updated` after the transition commits.

mod consumer;
mod handlers;
mod store;

pub use consumer::{CaseRouter, OPERATIONS_GROUP};
pub use handlers::{inbox, router, update_status, OperationsState, UpdateStatusRequest};
pub use store::{CaseRow, OperationsStore};
