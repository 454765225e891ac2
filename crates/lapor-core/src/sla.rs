//! Process-wide SLA duration.
//!
//! The resolution deadline for new cases is `created_at + duration`. The
//! duration is runtime-mutable through the workflow service's admin
//! endpoint, so it lives behind a reader-writer lock: the consumer and the
//! sweeper read it on every event/tick, the admin setter writes it.

use std::sync::RwLock;
use std::time::Duration;

use crate::error::ServiceError;

/// Default resolution window.
pub const DEFAULT_SLA: Duration = Duration::from_secs(60);

/// Smallest accepted resolution window.
pub const MIN_SLA: Duration = Duration::from_secs(10);

/// Shared holder for the SLA duration.
#[derive(Debug)]
pub struct SlaConfig {
    duration: RwLock<Duration>,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SLA)
    }
}

impl SlaConfig {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: RwLock::new(duration),
        }
    }

    /// Current duration. Lock poisoning falls back to the default rather
    /// than propagating a panic into request paths.
    #[must_use]
    pub fn get(&self) -> Duration {
        self.duration.read().map_or(DEFAULT_SLA, |d| *d)
    }

    /// Replaces the duration.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for durations under the
    /// 10-second floor.
    pub fn set(&self, duration: Duration) -> Result<(), ServiceError> {
        if duration < MIN_SLA {
            return Err(ServiceError::Validation(format!(
                "SLA duration must be at least {} seconds",
                MIN_SLA.as_secs()
            )));
        }
        if let Ok(mut guard) = self.duration.write() {
            *guard = duration;
            tracing::info!(seconds = duration.as_secs(), "SLA duration changed");
        }
        Ok(())
    }
}
