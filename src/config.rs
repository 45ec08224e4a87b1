//! Directory tuning and base directory resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding the default store location.
pub const BASE_DIR_ENV: &str = "PGP_CERT_D";

/// Directory name used under the platform data directory.
pub const DEFAULT_DIR_NAME: &str = "pgp.cert.d";

/// File name of the subkey index database inside a store.
pub const SUBKEY_DB_NAME: &str = "_subkey_map.db";

/// Tuning knobs for write transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// How many times a write is re-attempted after a tag conflict.
    pub write_retries: u32,
    /// Upper bound on waiting for a slot lock.
    pub lock_timeout: Duration,
    /// How often a blocked lock waiter re-checks for interruption.
    pub lock_poll_interval: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            write_retries: 5,
            lock_timeout: Duration::from_secs(30),
            lock_poll_interval: Duration::from_millis(25),
        }
    }
}

impl DirectoryConfig {
    /// Set the conflict retry bound.
    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    /// Set the lock wait bound.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the interruption polling interval.
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }
}

/// Resolve the store location.
///
/// Precedence: the explicit path, then `$PGP_CERT_D`, then
/// `<data dir>/pgp.cert.d`.
pub fn resolve_base_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(from_env) = std::env::var_os(BASE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(from_env));
    }

    dirs::data_dir()
        .map(|dir| dir.join(DEFAULT_DIR_NAME))
        .ok_or_else(|| Error::NotAStore("cannot determine a default store location".to_string()))
}
