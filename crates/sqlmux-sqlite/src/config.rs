//! Open configuration for SQLite connections.

use crate::ffi;
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

const MEMORY_MARKER: &str = ":memory:";

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Locator {
    /// A private in-memory database, discarded when the connection closes.
    #[default]
    Memory,
    /// A database file on disk.
    File(PathBuf),
}

impl Locator {
    /// The filename handed to `sqlite3_open_v2`.
    pub fn to_filename(&self) -> String {
        match self {
            Locator::Memory => MEMORY_MARKER.to_string(),
            Locator::File(path) => path.to_string_lossy().into_owned(),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Locator::Memory)
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        if s == MEMORY_MARKER {
            Locator::Memory
        } else {
            Locator::File(PathBuf::from(s))
        }
    }
}

impl From<String> for Locator {
    fn from(s: String) -> Self {
        Locator::from(s.as_str())
    }
}

impl From<&Path> for Locator {
    fn from(path: &Path) -> Self {
        Locator::File(path.to_path_buf())
    }
}

impl From<PathBuf> for Locator {
    fn from(path: PathBuf) -> Self {
        Locator::File(path)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Memory => f.write_str(MEMORY_MARKER),
            Locator::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// How the database is opened.
///
/// Each mode maps directly onto `SQLITE_OPEN_*` bits. SQLite only accepts
/// `ReadOnly`, `ReadWrite` and `ReadWriteCreate`; the remaining modes are
/// passed through as-is and fail at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    #[default]
    ReadWriteCreate,
    ReadCreate,
    CreateOnly,
}

impl OpenMode {
    pub(crate) fn to_sqlite_flags(self) -> c_int {
        match self {
            OpenMode::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            OpenMode::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
            OpenMode::ReadWriteCreate => ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
            OpenMode::ReadCreate => ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_CREATE,
            OpenMode::CreateOnly => ffi::SQLITE_OPEN_CREATE,
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadCreate)
    }
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Where the database lives.
    pub locator: Locator,
    /// Open mode (read-only, read-write, create...)
    pub mode: OpenMode,
    /// Busy timeout in milliseconds. Zero leaves SQLite's default (fail immediately).
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            locator: Locator::Memory,
            mode: OpenMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            locator: Locator::File(path.into()),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set the locator.
    pub fn locator(mut self, locator: impl Into<Locator>) -> Self {
        self.locator = locator.into();
        self
    }

    /// Set the open mode.
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_marker_parses_to_memory() {
        assert_eq!(Locator::from(":memory:"), Locator::Memory);
        assert_eq!(Locator::from("app.db"), Locator::File(PathBuf::from("app.db")));
        assert_eq!(Locator::Memory.to_filename(), ":memory:");
        assert_eq!(Locator::from("data/app.db").to_string(), "data/app.db");
    }

    #[test]
    fn modes_map_to_open_flags() {
        assert_eq!(OpenMode::ReadOnly.to_sqlite_flags(), ffi::SQLITE_OPEN_READONLY);
        assert_eq!(
            OpenMode::default().to_sqlite_flags(),
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE
        );
        assert_eq!(OpenMode::CreateOnly.to_sqlite_flags(), ffi::SQLITE_OPEN_CREATE);
    }

    #[test]
    fn modes_use_kebab_case_names() {
        let mode: OpenMode = serde_json::from_str("\"read-write-create\"").unwrap();
        assert_eq!(mode, OpenMode::ReadWriteCreate);
        assert_eq!(serde_json::to_string(&OpenMode::ReadOnly).unwrap(), "\"read-only\"");
        assert!(serde_json::from_str::<OpenMode>("\"readonly\"").is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let config = SqliteConfig::file("app.db")
            .mode(OpenMode::ReadOnly)
            .busy_timeout(250);
        assert_eq!(config.locator, Locator::File(PathBuf::from("app.db")));
        assert_eq!(config.mode, OpenMode::ReadOnly);
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(SqliteConfig::memory().busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }
}
