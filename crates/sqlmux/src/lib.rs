//! sqlmux: one database connection shared safely by many callers.
//!
//! A [`Database`] wraps a single driver connection and schedules every
//! operation through a fair reader/writer lock:
//!
//! - `query` and `query_stream` share the connection with other reads
//! - `tx` holds it exclusively for the whole transaction body
//! - requests are served in arrival order, so a waiting transaction is
//!   never starved by a steady flow of reads
//! - `dispose` closes the connection once; everything after fails with
//!   the closed error
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlmux::{connect, ConnectOptions, Cx, Outcome, Sql};
//!
//! let db = connect("app.db", ConnectOptions::default())?;
//! let cx = Cx::for_testing();
//!
//! let outcome = db
//!     .tx(&cx, async |tx| {
//!         tx.execute(&cx, Sql::new("INSERT INTO users (name) VALUES (?)").bind("Alice"))
//!             .await
//!     })
//!     .await;
//!
//! match db.query(&cx, Sql::new("SELECT name FROM users")).await {
//!     Outcome::Ok(rows) => println!("{} users", rows.len()),
//!     Outcome::Err(e) => eprintln!("query failed: {e}"),
//!     _ => {}
//! }
//! ```

pub mod database;
pub mod lock;
pub mod options;
pub mod queue;
pub mod stream;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use sqlmux_core::{
    ColumnInfo, Cx, Dialect, Driver, Error, FormattedQuery, FromValue, Outcome, QueryObject,
    Result, Row, RowSink, Sql, Value,
};
pub use sqlmux_sqlite::{Locator, OpenMode, SqliteConfig, SqliteDriver};

pub use database::Database;
pub use lock::{Access, Acquire, Guard, LockScheduler, LockStats, ReadGuard, WriteGuard};
pub use options::ConnectOptions;
pub use queue::{QueueReceiver, QueueSender, stream_queue};
pub use stream::RowStream;
pub use transaction::Transaction;

/// Open a SQLite database at `locator` and wrap it for shared use.
///
/// Options are checked before anything is opened. With `verbose` set,
/// statement tracing is switched on for the rest of the process (every
/// connection opened afterwards is traced, not just this one).
pub fn connect(
    locator: impl Into<Locator>,
    options: ConnectOptions,
) -> Result<Database<SqliteDriver>> {
    options.validate()?;
    if options.verbose {
        sqlmux_sqlite::verbose::enable();
    }

    let config = options.sqlite_config(locator.into());
    let driver = SqliteDriver::open(&config)?;
    tracing::debug!(locator = %config.locator, mode = ?config.mode, "connected");
    Ok(Database::new(driver))
}
