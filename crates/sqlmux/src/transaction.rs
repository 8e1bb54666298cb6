//! The handle passed to `Database::tx` callbacks.

use crate::queue::stream_queue;
use crate::stream::{self, RowStream};
use sqlmux_core::{Cx, Driver, Error, Outcome, QueryObject, Row};
use std::fmt;

/// Statement access inside a transaction.
///
/// Only `Database::tx` creates one, while it holds the write lock, so
/// statements go straight to the driver without asking the lock scheduler
/// again. Calling back into the owning `Database` from inside the callback
/// waits for a lock the callback itself holds and never completes.
pub struct Transaction<'a, D: Driver> {
    driver: &'a D,
}

impl<'a, D: Driver> Transaction<'a, D> {
    pub(crate) fn new(driver: &'a D) -> Self {
        Self { driver }
    }

    /// Run a statement and collect its rows.
    pub async fn query<Q: QueryObject>(&self, cx: &Cx, stmt: Q) -> Outcome<Vec<Row>, Error> {
        let query = match stmt.format(self.driver.dialect()) {
            Ok(q) => q,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %query.text, params = query.params.len(), "transaction query");

        let mut rows = Vec::new();
        match self
            .driver
            .run(cx, &query.text, &query.params, &mut rows)
            .await
        {
            Outcome::Ok(_) => Outcome::Ok(rows),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run a statement for its effect, returning the number of rows changed.
    pub async fn execute<Q: QueryObject>(&self, cx: &Cx, stmt: Q) -> Outcome<u64, Error> {
        let query = match stmt.format(self.driver.dialect()) {
            Ok(q) => q,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %query.text, params = query.params.len(), "transaction execute");

        let mut discarded: Vec<Row> = Vec::new();
        self.driver
            .run(cx, &query.text, &query.params, &mut discarded)
            .await
    }

    /// Stream a statement's rows.
    ///
    /// The stream borrows the transaction, so it cannot outlive the callback.
    pub fn query_stream<'s, Q: QueryObject>(&'s self, cx: &'s Cx, stmt: Q) -> RowStream<'s> {
        let query = match stmt.format(self.driver.dialect()) {
            Ok(q) => q,
            Err(e) => return RowStream::failed(e),
        };
        let driver = self.driver;
        let (sender, receiver) = stream_queue();
        RowStream::new(
            receiver,
            Box::pin(async move {
                stream::produce(driver, cx, query, sender).await;
                None
            }),
        )
    }
}

impl<D: Driver> fmt::Debug for Transaction<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}
