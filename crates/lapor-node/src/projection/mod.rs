//! Projection fan-out worker.
//!
//! Consumes the stream under group `projection-service` and applies every
//! event to N read replicas in parallel. Each replica runs the same
//! transactional pipeline: skip if the event id is already in the
//! replica's processed-events ledger, dispatch by type, record the event
//! id, commit. The worker acknowledges when at least one replica applied;
//! a total failure leaves the delivery pending so the event is retried.
//!
//! Replicas can briefly diverge (one down while the others apply) but
//! never permanently miss an event: the ledger row only commits together
//! with the apply, so a redelivery repairs the lagging replica.

mod replica;
mod worker;

pub use replica::ReplicaStore;
pub use worker::{ProjectionWorker, PROJECTION_GROUP};
