//! The driver contract.
//!
//! A driver owns one physical connection and offers the small set of
//! primitives the facade needs: run a statement delivering rows through a
//! callback, begin/commit/rollback, and close. Drivers do not coordinate
//! concurrent callers themselves; that is the facade's job.
//!
//! All operations take a `Cx` context for structured concurrency, in the
//! same shape as every other asupersync-aware API.

use crate::error::Error;
use crate::query::Dialect;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Receiver of rows pushed by a driver, one at a time, in statement order.
pub trait RowSink: Send {
    fn row(&mut self, row: Row);
}

impl RowSink for Vec<Row> {
    fn row(&mut self, row: Row) {
        self.push(row);
    }
}

/// A single physical database connection.
///
/// # Example
///
/// ```rust,ignore
/// let mut rows = Vec::new();
/// let changed = driver.run(&cx, "SELECT * FROM t WHERE id = ?1", &[Value::Int(1)], &mut rows).await;
/// ```
pub trait Driver: Send + Sync {
    /// The dialect query objects are rendered for.
    fn dialect(&self) -> Dialect;

    /// Run one statement, handing every result row to `sink` as it is read.
    ///
    /// Returns the number of rows changed by the statement.
    fn run(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        sink: &mut dyn RowSink,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Open a transaction.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Commit the open transaction.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Roll back the open transaction.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Close the connection. The facade guarantees this is called at most once.
    fn close(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Synchronously discard an open transaction whose owner went away
    /// without committing or rolling back (for example a dropped future).
    ///
    /// Best effort; failures are the driver's to log.
    fn abandon_transaction(&self) {}
}
