//! SQLite driver for sqlmux.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate implements the `Driver` contract from sqlmux-core on top of
//! libsqlite3 (bundled through `libsqlite3-sys`).
//!
//! # Features
//!
//! - In-memory and file-based databases
//! - Open modes and busy timeout
//! - Rows delivered to a `RowSink` as each one is stepped
//! - Process-wide verbose statement tracing through `tracing`
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlmux_sqlite::{SqliteDriver, SqliteConfig, OpenMode};
//! use sqlmux_core::{Driver, Cx, Outcome, Value};
//!
//! let driver = SqliteDriver::open(&SqliteConfig::file("app.db").mode(OpenMode::ReadWrite))?;
//! let cx = Cx::for_testing();
//! let mut rows = Vec::new();
//! match driver.run(&cx, "SELECT name FROM users WHERE id = ?1", &[Value::Int(1)], &mut rows).await {
//!     Outcome::Ok(_) => println!("{} rows", rows.len()),
//!     Outcome::Err(e) => eprintln!("Error: {}", e),
//!     _ => {}
//! }
//! ```
//!
//! # Thread Safety
//!
//! `SqliteDriver` is `Send` and `Sync`. The handle sits behind a mutex, so
//! statements never run on it concurrently; callers that need scheduling
//! fairness wrap the driver in `sqlmux::Database`.

pub mod config;
pub mod connection;
pub mod ffi;
pub mod types;
pub mod verbose;

pub use config::{DEFAULT_BUSY_TIMEOUT_MS, Locator, OpenMode, SqliteConfig};
pub use connection::SqliteDriver;

/// Get the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}
