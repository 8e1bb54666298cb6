//! Shared helpers for the sqlmux integration tests.

#![allow(dead_code)]

use sqlmux::{Cx, Dialect, Driver, Error, Outcome, RowSink, SqliteDriver, Value};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[path = "../../src/testing.rs"]
mod testing;

pub(crate) use testing::{join_all, run, yield_now};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Wraps a SQLite driver so every statement takes a few scheduler turns to
/// complete, and records how many were in flight at once.
pub struct DelayedDriver {
    inner: SqliteDriver,
    yields: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl DelayedDriver {
    pub fn new(inner: SqliteDriver, yields: usize) -> Self {
        Self {
            inner,
            yields,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &SqliteDriver {
        &self.inner
    }

    pub fn peak(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

impl Driver for DelayedDriver {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn run(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        sink: &mut dyn RowSink,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let inner = self.inner.run(cx, sql, params, sink);
        let in_flight = Arc::clone(&self.in_flight);
        let peak = Arc::clone(&self.peak);
        let yields = self.yields;
        async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            for _ in 0..yields {
                yield_now().await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            inner.await
        }
    }

    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.inner.begin(cx)
    }

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.inner.commit(cx)
    }

    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.inner.rollback(cx)
    }

    fn close(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.inner.close(cx)
    }

    fn abandon_transaction(&self) {
        self.inner.abandon_transaction();
    }
}
