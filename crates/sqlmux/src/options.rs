//! Connection options.

use serde::{Deserialize, Serialize};
use sqlmux_core::{Error, Result};
use sqlmux_sqlite::{DEFAULT_BUSY_TIMEOUT_MS, Locator, OpenMode, SqliteConfig};

/// Options accepted by [`connect`](crate::connect).
///
/// Deserializes from the camelCase JSON shape
/// `{"mode": "read-only", "busyTimeout": 250, "verbose": false}`; missing
/// fields take their defaults and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectOptions {
    /// How the database is opened.
    pub mode: OpenMode,
    /// Milliseconds a statement waits on a locked database before failing.
    /// Must be positive.
    pub busy_timeout: u32,
    /// Turn on statement tracing for the rest of the process.
    pub verbose: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT_MS,
            verbose: false,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid connect options: {e}")))
    }

    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout = ms;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check the options before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.busy_timeout == 0 {
            return Err(Error::config(
                "busyTimeout must be a positive number of milliseconds",
            ));
        }
        Ok(())
    }

    /// Driver configuration for `locator`.
    pub fn sqlite_config(&self, locator: Locator) -> SqliteConfig {
        SqliteConfig {
            locator,
            mode: self.mode,
            busy_timeout_ms: self.busy_timeout,
        }
    }
}
