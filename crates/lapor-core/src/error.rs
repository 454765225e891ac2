//! Error kinds shared across the lapor services.
//!
//! Request paths map these onto HTTP statuses; consumer handlers return
//! them to the bus loop, which only treats transport-class failures as
//! retryable.

use thiserror::Error;

/// The error vocabulary of the platform.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The request payload failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Credentials are missing or could not be verified.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The caller is authenticated but not allowed to act here.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// The addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is forbidden by a domain rule, e.g. upvoting an
    /// anonymous report.
    #[error("policy violation: {0}")]
    Policy(String),

    /// A uniqueness constraint fired. Paths that treat duplicates as
    /// idempotent no-ops swallow this before it surfaces.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The database or the bus is unreachable or misbehaving.
    #[error("transport error: {0}")]
    Transport(String),

    /// A per-replica projection apply failed.
    #[error("projection error: {0}")]
    Projection(String),
}

impl ServiceError {
    /// True when retrying the same operation against the same state could
    /// succeed. Consumer loops use this to decide between redelivery and
    /// a permanent skip.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Projection(_))
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(msg.clone().unwrap_or_else(|| code.to_string()))
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("malformed payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_projection_are_transient() {
        assert!(ServiceError::Transport("db gone".into()).is_transient());
        assert!(ServiceError::Projection("replica 2".into()).is_transient());
        assert!(!ServiceError::Validation("empty content".into()).is_transient());
        assert!(!ServiceError::NotFound("report".into()).is_transient());
    }

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed: votes".into()),
        );
        assert!(matches!(ServiceError::from(err), ServiceError::Conflict(_)));
    }
}
