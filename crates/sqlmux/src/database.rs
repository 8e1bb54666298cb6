//! The connection facade.
//!
//! `Database` owns one driver and lets any number of callers share it:
//! reads (`query`, `query_stream`) run together, transactions (`tx`) run
//! alone, and the lock scheduler keeps writers from starving behind a steady
//! flow of readers.

use crate::lock::{LockScheduler, LockStats};
use crate::queue::stream_queue;
use crate::stream::{self, RowStream};
use crate::transaction::Transaction;
use sqlmux_core::{
    Cx, Driver, Error, Outcome, QueryObject, Row,
    error::{TransactionError, TransactionErrorKind},
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One logical connection shared by many callers.
///
/// # Example
///
/// ```rust,ignore
/// let db = sqlmux::connect(":memory:", ConnectOptions::default())?;
/// let cx = Cx::for_testing();
///
/// let created = db
///     .tx(&cx, async |tx| {
///         match tx.execute(&cx, Sql::new("CREATE TABLE users (name TEXT)")).await {
///             Outcome::Ok(_) => {}
///             other => return other,
///         }
///         tx.execute(&cx, Sql::new("INSERT INTO users VALUES (").bind("Alice").push(")")).await
///     })
///     .await;
///
/// let rows = db.query(&cx, Sql::new("SELECT name FROM users")).await;
/// ```
pub struct Database<D: Driver> {
    driver: D,
    lock: LockScheduler,
    closed: AtomicBool,
}

/// Asks the driver to discard a transaction whose `tx` future was dropped
/// before it could commit or roll back.
struct AbandonGuard<'a, D: Driver> {
    driver: &'a D,
    armed: bool,
}

impl<D: Driver> AbandonGuard<'_, D> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<D: Driver> Drop for AbandonGuard<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("abandoning unfinished transaction");
            self.driver.abandon_transaction();
        }
    }
}

impl<D: Driver> Database<D> {
    /// Wrap a driver. The database takes ownership of its connection.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            lock: LockScheduler::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether `dispose` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the lock scheduler.
    pub fn lock_stats(&self) -> LockStats {
        self.lock.stats()
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Run a statement with shared access and collect its rows.
    ///
    /// A statement that fails to render is reported before any lock is
    /// requested.
    #[tracing::instrument(level = "debug", skip(self, cx, stmt))]
    pub async fn query<Q: QueryObject>(&self, cx: &Cx, stmt: Q) -> Outcome<Vec<Row>, Error> {
        let query = match stmt.format(self.driver.dialect()) {
            Ok(q) => q,
            Err(e) => return Outcome::Err(e),
        };
        if self.is_closed() {
            return Outcome::Err(Error::closed());
        }

        let _guard = self.lock.read().await;
        if self.is_closed() {
            return Outcome::Err(Error::closed());
        }

        tracing::debug!(sql = %query.text, params = query.params.len(), "query");
        let mut rows = Vec::new();
        match self
            .driver
            .run(cx, &query.text, &query.params, &mut rows)
            .await
        {
            Outcome::Ok(_) => {
                tracing::debug!(rows = rows.len(), "query finished");
                Outcome::Ok(rows)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Stream a statement's rows with shared access.
    ///
    /// The statement is rendered now; a rendering failure becomes the
    /// stream's first and only event. The read lock is requested on the
    /// first poll and held until the stream ends, fails or is dropped.
    pub fn query_stream<'a, Q: QueryObject>(&'a self, cx: &'a Cx, stmt: Q) -> RowStream<'a> {
        let query = match stmt.format(self.driver.dialect()) {
            Ok(q) => q,
            Err(e) => return RowStream::failed(e),
        };
        if self.is_closed() {
            return RowStream::failed(Error::closed());
        }

        let (sender, receiver) = stream_queue();
        RowStream::new(
            receiver,
            Box::pin(async move {
                let guard = self.lock.read().await;
                if self.is_closed() {
                    sender.fail(Error::closed());
                } else {
                    stream::produce(&self.driver, cx, query, sender).await;
                }
                Some(guard)
            }),
        )
    }

    /// Run `callback` inside a transaction with exclusive access.
    ///
    /// The transaction commits when the callback returns `Outcome::Ok` and
    /// rolls back otherwise, handing the callback's outcome back unchanged.
    ///
    /// - If `BEGIN` fails the callback is never invoked.
    /// - If `COMMIT` fails a rollback is attempted and the commit error is
    ///   returned.
    /// - If the rollback after a failed callback itself fails, a
    ///   `TransactionError` of kind `RollbackFailed` is returned, carrying
    ///   the callback's failure as `original`.
    #[tracing::instrument(level = "debug", skip(self, cx, callback))]
    pub async fn tx<T, F>(&self, cx: &Cx, callback: F) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&Transaction<'_, D>) -> Outcome<T, Error>,
    {
        let _guard = self.lock.write().await;
        if self.is_closed() {
            return Outcome::Err(Error::closed());
        }

        match self.driver.begin(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        tracing::debug!("transaction started");

        let mut abandon = AbandonGuard {
            driver: &self.driver,
            armed: true,
        };
        let tx = Transaction::new(&self.driver);

        let (failure, original) = match callback(&tx).await {
            Outcome::Ok(value) => {
                return match self.driver.commit(cx).await {
                    Outcome::Ok(()) => {
                        abandon.disarm();
                        tracing::debug!("transaction committed");
                        Outcome::Ok(value)
                    }
                    Outcome::Err(e) => {
                        abandon.disarm();
                        tracing::debug!(error = %e, "commit failed, rolling back");
                        if let Outcome::Err(rollback) = self.driver.rollback(cx).await {
                            tracing::warn!(error = %rollback, "rollback after failed commit also failed");
                        }
                        Outcome::Err(e)
                    }
                    // Leave the guard armed: the transaction may still be open
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                };
            }
            Outcome::Err(e) => (Outcome::Err(e.clone()), e),
            Outcome::Cancelled(r) => (Outcome::Cancelled(r), Error::Cancelled),
            Outcome::Panicked(p) => (
                Outcome::Panicked(p),
                Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::Panicked,
                    message: "transaction body panicked".to_string(),
                    source: None,
                    original: None,
                }),
            ),
        };

        match self.driver.rollback(cx).await {
            Outcome::Ok(()) => {
                abandon.disarm();
                tracing::debug!(reason = %original, "transaction rolled back");
                failure
            }
            Outcome::Err(rollback) => {
                abandon.disarm();
                tracing::debug!(error = %rollback, reason = %original, "rollback failed");
                Outcome::Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::RollbackFailed,
                    message: "rollback failed".to_string(),
                    source: Some(Arc::new(rollback)),
                    original: Some(Box::new(original)),
                }))
            }
            Outcome::Cancelled(_) | Outcome::Panicked(_) => failure,
        }
    }

    /// Close the connection.
    ///
    /// The driver is closed exactly once; every later operation, including
    /// another `dispose`, fails with a connection-closed error. Operations
    /// already holding the lock are not interrupted, and operations waiting
    /// for it fail once admitted.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn dispose(&self, cx: &Cx) -> Outcome<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Outcome::Err(Error::closed());
        }
        tracing::debug!(stats = ?self.lock.stats(), "disposing connection");
        self.driver.close(cx).await
    }
}

impl<D: Driver + fmt::Debug> fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.driver)
            .field("lock", &self.lock)
            .field("closed", &self.is_closed())
            .finish()
    }
}
