//! Test support: a scripted driver and a few executor helpers.
//!
//! Also compiled into the integration tests through `tests/common`.

use asupersync::CancelReason;
use asupersync::runtime::RuntimeBuilder;
use sqlmux_core::{
    Cx, Dialect, Driver, Error, Outcome, Row, RowSink, Value,
    error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind},
};
use std::collections::{HashMap, HashSet};
use std::future::{Future, poll_fn};
use std::sync::{Arc, Mutex};
use std::task::Poll;

pub(crate) use asupersync::runtime::yield_now;

/// Drive `future` to completion on a current-thread runtime.
pub(crate) fn run<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

/// Poll every future on the current task until all are done.
pub(crate) async fn join_all<F: Future + Unpin>(futures: Vec<F>) -> Vec<F::Output> {
    let mut pending: Vec<Option<F>> = futures.into_iter().map(Some).collect();
    let mut outputs: Vec<Option<F::Output>> = pending.iter().map(|_| None).collect();
    poll_fn(|cx| {
        for (slot, output) in pending.iter_mut().zip(outputs.iter_mut()) {
            if let Some(fut) = slot {
                if let Poll::Ready(out) = std::pin::Pin::new(fut).poll(cx) {
                    *output = Some(out);
                    *slot = None;
                }
            }
        }
        if pending.iter().all(Option::is_none) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    })
    .await;
    outputs.into_iter().flatten().collect()
}

#[derive(Default)]
pub(crate) struct MockState {
    pub responses: HashMap<String, Vec<Row>>,
    pub failing: HashSet<String>,
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    /// ROLLBACK reports cancellation instead of finishing.
    pub cancel_rollback: bool,
    pub fail_close: bool,
    /// Every driver call in order: `start <sql>`, `end <sql>`, `BEGIN`, ...
    pub log: Vec<String>,
    pub active: usize,
    pub peak: usize,
    pub closes: usize,
    pub abandoned: usize,
}

/// Scripted driver: statements answer with canned rows after a configurable
/// number of yields.
pub(crate) struct MockDriver {
    state: Arc<Mutex<MockState>>,
    yields: usize,
}

fn mock_error(sql: &str, message: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: Some(sql.to_string()),
        code: None,
        message: message.to_string(),
        source: None,
    })
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            yields: 0,
        }
    }

    pub fn with_yields(mut self, yields: usize) -> Self {
        self.yields = yields;
        self
    }

    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    pub fn respond(&self, sql: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(sql.to_string(), rows);
    }

    pub fn fail_on(&self, sql: &str) {
        self.state.lock().unwrap().failing.insert(sql.to_string());
    }

    fn boundary(&self, statement: &str, fails: impl Fn(&MockState) -> bool) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.log.push(statement.to_string());
        if fails(&*state) {
            Err(mock_error(statement, &format!("{statement} failed")))
        } else {
            Ok(())
        }
    }
}

impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn run(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
        sink: &mut dyn RowSink,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let yields = self.yields;
        async move {
            {
                let mut s = state.lock().unwrap();
                s.log.push(format!("start {sql}"));
                s.active += 1;
                s.peak = s.peak.max(s.active);
            }
            for _ in 0..yields {
                yield_now().await;
            }
            let result = {
                let mut s = state.lock().unwrap();
                s.log.push(format!("end {sql}"));
                s.active -= 1;
                if s.failing.contains(&sql) {
                    Err(mock_error(&sql, "mock failure"))
                } else {
                    Ok(s.responses.get(&sql).cloned().unwrap_or_default())
                }
            };
            match result {
                Ok(rows) => {
                    let count = rows.len() as u64;
                    for row in rows {
                        sink.row(row);
                    }
                    Outcome::Ok(count)
                }
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.boundary("BEGIN", |s| s.fail_begin);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.boundary("COMMIT", |s| s.fail_commit);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.boundary("ROLLBACK", |s| s.fail_rollback);
        let cancelled = self.state.lock().unwrap().cancel_rollback;
        async move {
            if cancelled {
                return Outcome::Cancelled(CancelReason::user("rollback interrupted"));
            }
            result.map_or_else(Outcome::Err, Outcome::Ok)
        }
    }

    fn close(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.log.push("CLOSE".to_string());
            state.closes += 1;
            if state.fail_close {
                Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Close,
                    message: "close failed".to_string(),
                    source: None,
                }))
            } else {
                Ok(())
            }
        };
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn abandon_transaction(&self) {
        let mut state = self.state.lock().unwrap();
        state.log.push("ABANDON".to_string());
        state.abandoned += 1;
    }
}
