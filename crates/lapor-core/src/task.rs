//! Small helper for running store calls off the async runtime.

use crate::error::ServiceError;

/// Runs a blocking closure on the blocking pool and flattens the join
/// error into the closure's error type.
///
/// Store access goes through here so `SQLite` calls never block a runtime
/// worker thread.
///
/// # Errors
///
/// Returns the closure's error, or `ServiceError::Transport` if the task
/// was cancelled or panicked.
pub async fn run_blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Transport(format!("blocking task join: {e}")))?
}
