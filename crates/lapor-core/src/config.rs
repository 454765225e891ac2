//! Environment-driven service configuration and store bootstrap.
//!
//! Every service reads the same small set of variables: where its store
//! lives, where the bus lives, which port to serve on, and an instance id
//! used as the stable consumer name. The projection and query services
//! additionally take a comma-separated list of replica paths.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use tracing::warn;

/// Variable naming the data directory; per-store defaults hang off it.
pub const DATA_DIR_ENV: &str = "LAPOR_DATA_DIR";

/// How many times a store open is retried before giving up.
const OPEN_ATTEMPTS: u32 = 30;
/// Pause between open attempts.
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(2);
/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("failed to open store {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },
}

/// Reads an environment variable with a default.
#[must_use]
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

/// Settings shared by every service process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Data directory for default store paths.
    pub data_dir: PathBuf,
    /// Path of the bus stream database.
    pub bus_path: PathBuf,
    /// HTTP listen port.
    pub server_port: u16,
    /// Stable instance identifier; doubles as the consumer name.
    pub instance_id: String,
}

impl ServiceConfig {
    /// Loads the shared settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an unparseable port.
    pub fn from_env(default_port: &str, default_instance: &str) -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(env_or(DATA_DIR_ENV, "./data"));
        let bus_path = std::env::var("BUS_DB")
            .ok()
            .filter(|v| !v.is_empty())
            .map_or_else(|| data_dir.join("bus.db"), PathBuf::from);
        let port_raw = env_or("SERVER_PORT", default_port);
        let server_port = port_raw.parse().map_err(|_| ConfigError::Invalid {
            var: "SERVER_PORT",
            value: port_raw,
        })?;

        Ok(Self {
            data_dir,
            bus_path,
            server_port,
            instance_id: env_or("INSTANCE_ID", default_instance),
        })
    }

    /// Path of this service's own store: `DB_PATH` if set, otherwise
    /// `<data_dir>/<default_name>`.
    #[must_use]
    pub fn store_path(&self, default_name: &str) -> PathBuf {
        std::env::var("DB_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map_or_else(|| self.data_dir.join(default_name), PathBuf::from)
    }

    /// Replica paths from `DB_PATHS` (comma-separated), defaulting to a
    /// single replica under the data directory.
    #[must_use]
    pub fn replica_paths(&self) -> Vec<PathBuf> {
        let raw = env_or("DB_PATHS", "");
        if raw.is_empty() {
            return vec![self.data_dir.join("replica-1.db")];
        }
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

/// Opens a store database, retrying while another process holds the file,
/// and applies `schema` idempotently.
///
/// The retry loop mirrors the platform's database connect policy: up to 30
/// attempts, 2 seconds apart.
///
/// # Errors
///
/// Returns `ConfigError::Open` when the final attempt fails.
pub fn open_store(path: &Path, schema: &str) -> Result<Arc<Mutex<Connection>>, ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let mut last_err = None;
    for attempt in 1..=OPEN_ATTEMPTS {
        match try_open(path, schema) {
            Ok(conn) => return Ok(Arc::new(Mutex::new(conn))),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    attempt = attempt,
                    error = %err,
                    "Waiting for store"
                );
                last_err = Some(err);
                if attempt < OPEN_ATTEMPTS {
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }

    Err(ConfigError::Open {
        path: path.display().to_string(),
        source: last_err.unwrap_or(rusqlite::Error::InvalidQuery),
    })
}

fn try_open(path: &Path, schema: &str) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(schema)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_prefers_set_values() {
        std::env::set_var("LAPOR_TEST_ENV_OR", "set");
        assert_eq!(env_or("LAPOR_TEST_ENV_OR", "default"), "set");
        std::env::remove_var("LAPOR_TEST_ENV_OR");
        assert_eq!(env_or("LAPOR_TEST_ENV_OR", "default"), "default");
    }

    #[test]
    fn open_store_applies_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let conn = open_store(&path, "CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY);")
            .unwrap();

        let guard = conn.lock().unwrap();
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
