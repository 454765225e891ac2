//! Workflow service: status projection, SLA jobs, notifications, and the
//! breach sweeper.
//!
//! The consumer (group `workflow-service`) gives every new report a
//! deadline and a PENDING SLA job, and turns every status change into a
//! projection update plus a notification for the reporter. The sweeper
//! ticks on a fixed period, escalates overdue PENDING jobs exactly once,
//! and publishes `report.escalated` for each breach.

mod consumer;
mod handlers;
mod store;
mod sweeper;

pub use consumer::{WorkflowConsumer, WORKFLOW_GROUP};
pub use handlers::{router, SetSlaConfigRequest, WorkflowState};
pub use store::{NotificationRow, SlaJobRow, SlaStatusRow, WorkflowStore};
pub use sweeper::{run_sweeper, sweep_once, SWEEP_PERIOD};
