//! Session configuration
//!
//! Loaded from TOML. Every field is optional; missing fields take the
//! defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::commit::EditOrdering;
use crate::error::Result;

const DEFAULT_REQUEST_TIMEOUT_MILLIS: u64 = 60_000;
const DEFAULT_BETWEEN_ATTEMPTS_TIMEOUT_MILLIS: u64 = 2_000;
const DEFAULT_SLEEP_FACTOR: f64 = 1.5;

/// Per-device session configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Timeout applied to every RPC
    pub request_timeout_millis: u64,

    /// Subscribe to notifications and reconnect when the device reports a
    /// capability change
    pub reconnect_on_schema_change: bool,

    /// Initial delay between connection attempts
    pub between_attempts_timeout_millis: u64,

    /// Multiplier applied to the delay after each failed attempt
    pub sleep_factor: f64,

    /// Give up after this many attempts; 0 retries forever
    pub max_connection_attempts: u32,

    /// Upper bound for the delay between attempts
    pub max_sleep_millis: Option<u64>,

    /// Directory persisting downloaded schema sources
    pub schema_cache_dir: Option<PathBuf>,

    /// Order of edits inside one transaction
    pub edit_ordering: EditOrdering,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_millis: DEFAULT_REQUEST_TIMEOUT_MILLIS,
            reconnect_on_schema_change: false,
            between_attempts_timeout_millis: DEFAULT_BETWEEN_ATTEMPTS_TIMEOUT_MILLIS,
            sleep_factor: DEFAULT_SLEEP_FACTOR,
            max_connection_attempts: 0,
            max_sleep_millis: None,
            schema_cache_dir: None,
            edit_ordering: EditOrdering::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_millis)
    }

    pub fn between_attempts_timeout(&self) -> Duration {
        Duration::from_millis(self.between_attempts_timeout_millis)
    }

    pub fn max_sleep(&self) -> Option<Duration> {
        self.max_sleep_millis.map(Duration::from_millis)
    }
}
