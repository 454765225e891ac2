//! Fan-out of one event across every replica.

use async_trait::async_trait;
use tracing::{debug, warn};

use lapor_core::bus::EventHandler;
use lapor_core::events::Event;
use lapor_core::ServiceError;

use super::replica::ReplicaStore;

/// Consumer group of the projection worker.
pub const PROJECTION_GROUP: &str = "projection-service";

/// Applies each consumed event to all replicas in parallel and reports
/// success to the bus loop when at least one replica applied.
pub struct ProjectionWorker {
    replicas: Vec<ReplicaStore>,
}

impl ProjectionWorker {
    /// Builds a worker over a non-empty replica set.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for an empty set: with no
    /// replicas every event would be acknowledged without being applied
    /// anywhere.
    pub fn new(replicas: Vec<ReplicaStore>) -> Result<Self, ServiceError> {
        if replicas.is_empty() {
            return Err(ServiceError::Validation(
                "projection worker needs at least one replica".into(),
            ));
        }
        Ok(Self { replicas })
    }

    /// The replica set, for introspection and tests.
    #[must_use]
    pub fn replicas(&self) -> &[ReplicaStore] {
        &self.replicas
    }
}

#[async_trait]
impl EventHandler for ProjectionWorker {
    async fn handle(&self, event: &Event) -> Result<(), ServiceError> {
        // One blocking task per replica; they run concurrently and each
        // replica's transaction is its own failure domain.
        let mut tasks = Vec::with_capacity(self.replicas.len());
        for replica in &self.replicas {
            let replica = replica.clone();
            let event = event.clone();
            tasks.push((
                replica.label().to_string(),
                tokio::task::spawn_blocking(move || replica.apply(&event)),
            ));
        }

        let mut succeeded = 0usize;
        let mut failures = Vec::new();
        for (label, task) in tasks {
            match task.await {
                Ok(Ok(applied)) => {
                    succeeded += 1;
                    debug!(
                        replica = %label,
                        event_id = %event.event_id,
                        applied = applied,
                        "Replica pipeline finished"
                    );
                }
                Ok(Err(err)) => {
                    warn!(replica = %label, event_id = %event.event_id, error = %err,
                          "Replica apply failed");
                    failures.push(format!("{label}: {err}"));
                }
                Err(join) => {
                    warn!(replica = %label, event_id = %event.event_id, error = %join,
                          "Replica task died");
                    failures.push(format!("{label}: {join}"));
                }
            }
        }

        if succeeded == 0 {
            // No replica applied: do not acknowledge, let the bus redeliver.
            return Err(ServiceError::Projection(format!(
                "event {} failed on all replicas: {}",
                event.event_id,
                failures.join("; ")
            )));
        }
        Ok(())
    }
}
