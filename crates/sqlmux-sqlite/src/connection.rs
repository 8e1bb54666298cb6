//! SQLite driver implementation.
//!
//! `SqliteDriver` owns one `sqlite3` handle behind a mutex and implements the
//! [`Driver`] contract from sqlmux-core. Every call runs synchronously on the
//! caller's thread; the returned futures are already complete.

// FFI casts have to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::config::{Locator, OpenMode, SqliteConfig};
use crate::ffi;
use crate::types;
use crate::verbose;
use sqlmux_core::{
    Cx, Dialect, Driver, Error, Outcome, Row, RowSink, Value,
    error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind},
    row::ColumnInfo,
};
use std::ffi::{CStr, CString, c_int};
use std::future::Future;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Inner state of the driver, protected by a mutex.
struct SqliteInner {
    /// Null once the connection has been closed.
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is only ever touched while holding the driver's mutex,
// so it is never used from two threads at once.
unsafe impl Send for SqliteInner {}

impl SqliteInner {
    fn handle(&self) -> Result<*mut ffi::sqlite3, Error> {
        if self.db.is_null() {
            Err(Error::closed())
        } else {
            Ok(self.db)
        }
    }
}

/// A prepared statement, finalized when dropped.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw came from a successful prepare and is finalized only here
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

/// A single SQLite connection.
///
/// ```rust,ignore
/// let driver = SqliteDriver::open(&SqliteConfig::memory())?;
/// driver.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
/// ```
pub struct SqliteDriver {
    inner: Mutex<SqliteInner>,
    locator: Locator,
    mode: OpenMode,
    traced: bool,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("locator", &self.locator)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl SqliteDriver {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let filename = config.locator.to_filename();
        let c_path = CString::new(filename.as_str())
            .map_err(|_| connect_error("invalid path: contains null byte".to_string()))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.mode.to_sqlite_flags();

        // SAFETY: we pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is a handle sqlite3_open_v2 allocated; it must be
                // closed even though the open failed
                unsafe {
                    let msg = ffi::last_error_message(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(connect_error(format!(
                "failed to open {} ({:?}): {}",
                config.locator, config.mode, msg
            )));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        let traced = verbose::is_enabled();
        if traced {
            // SAFETY: db is valid
            let rc = unsafe { verbose::install(db) };
            if rc != ffi::SQLITE_OK {
                tracing::warn!(code = rc, "failed to install statement trace hook");
            }
        }

        tracing::debug!(
            locator = %config.locator,
            mode = ?config.mode,
            busy_timeout_ms = config.busy_timeout_ms,
            traced,
            sqlite_version = crate::sqlite_version(),
            "opened sqlite connection"
        );

        Ok(Self {
            inner: Mutex::new(SqliteInner { db }),
            locator: config.locator.clone(),
            mode: config.mode,
            traced,
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database, creating it if needed.
    pub fn open_file(path: impl Into<std::path::PathBuf>) -> Result<Self, Error> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Whether the statement trace hook was installed at open time.
    pub fn is_traced(&self) -> bool {
        self.traced
    }

    /// Whether the handle is still open.
    pub fn is_open(&self) -> bool {
        !self.lock().db.is_null()
    }

    /// Whether a transaction is currently open on the handle.
    pub fn in_transaction(&self) -> bool {
        let inner = self.lock();
        match inner.handle() {
            // SAFETY: db is valid
            Ok(db) => unsafe { ffi::sqlite3_get_autocommit(db) == 0 },
            Err(_) => false,
        }
    }

    /// Execute SQL directly without preparing (DDL, multi-statement scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        let inner = self.lock();
        exec(inner.handle()?, sql)
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64, Error> {
        let inner = self.lock();
        let db = inner.handle()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Prepare, bind and step one statement, pushing rows into `sink`.
    fn run_sync(&self, sql: &str, params: &[Value], sink: &mut dyn RowSink) -> Result<u64, Error> {
        let inner = self.lock();
        let db = inner.handle()?;
        let Some(stmt) = prepare_stmt(db, sql)? else {
            // Nothing but whitespace or comments
            return Ok(0);
        };

        for (i, param) in params.iter().enumerate() {
            let index = c_int::try_from(i + 1).map_err(|_| bind_error(db, sql, i + 1))?;
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(stmt.raw, index, param) };
            if rc != ffi::SQLITE_OK {
                return Err(bind_error(db, sql, i + 1));
            }
        }

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let columns = Arc::new(ColumnInfo::new(
            (0..col_count)
                // SAFETY: stmt is valid and i is in range
                .map(|i| unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i)))
                .collect(),
        ));

        let mut rows = 0_u64;
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(stmt.raw) };
            match rc {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    sink.row(Row::with_columns(Arc::clone(&columns), values));
                    rows += 1;
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(db, sql)),
            }
        }

        // SAFETY: stmt and db are valid
        let changes = unsafe {
            if ffi::sqlite3_stmt_readonly(stmt.raw) == 0 {
                u64::try_from(ffi::sqlite3_changes(db)).unwrap_or(0)
            } else {
                0
            }
        };
        tracing::trace!(rows, changes, "statement finished");
        Ok(changes)
    }

    fn transaction_statement(&self, sql: &'static str) -> Result<(), Error> {
        let inner = self.lock();
        exec(inner.handle()?, sql)?;
        tracing::debug!(statement = sql, "transaction boundary");
        Ok(())
    }

    fn close_sync(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        let db = inner.handle()?;
        // SAFETY: db is valid; every statement was finalized when its run ended
        let rc = unsafe { ffi::sqlite3_close(db) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: a failed close leaves the handle open
            let msg = unsafe { ffi::last_error_message(db) };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Close,
                message: format!("failed to close {}: {}", self.locator, msg),
                source: None,
            }));
        }
        inner.db = ptr::null_mut();
        tracing::debug!(locator = %self.locator, "closed sqlite connection");
        Ok(())
    }
}

impl Drop for SqliteDriver {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and nothing else can reach it any more
            unsafe {
                ffi::sqlite3_close_v2(inner.db);
            }
        }
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn run(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
        sink: &mut dyn RowSink,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.run_sync(sql, params, sink);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.transaction_statement("BEGIN");
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.transaction_statement("COMMIT");
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.transaction_statement("ROLLBACK");
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn close(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.close_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn abandon_transaction(&self) {
        if !self.in_transaction() {
            return;
        }
        if let Err(e) = self.transaction_statement("ROLLBACK") {
            tracing::warn!(error = %e, "rollback of abandoned transaction failed");
        }
    }
}

// Helper functions

fn connect_error(message: String) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message,
        source: None,
    })
}

fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<(), Error> {
    let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

    if rc != ffi::SQLITE_OK {
        let message = if errmsg.is_null() {
            ffi::error_string(rc).to_string()
        } else {
            // SAFETY: errmsg was allocated by SQLite and must be freed with sqlite3_free
            unsafe {
                let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                ffi::sqlite3_free(errmsg.cast());
                msg
            }
        };
        // SAFETY: db is valid
        let code = unsafe { ffi::sqlite3_extended_errcode(db) };
        return Err(Error::Query(QueryError {
            kind: error_code_to_kind(code),
            sql: Some(sql.to_string()),
            code: Some(code),
            message,
            source: None,
        }));
    }
    Ok(())
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<Option<Statement>, Error> {
    let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
    let len = c_int::try_from(c_sql.as_bytes().len()).map_err(|_| Error::Query(QueryError {
        kind: QueryErrorKind::DataTruncation,
        sql: None,
        code: Some(ffi::SQLITE_TOOBIG),
        message: "statement text too long".to_string(),
        source: None,
    }))?;

    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
    // SAFETY: all pointers are valid
    let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), len, &mut stmt, ptr::null_mut()) };

    if rc != ffi::SQLITE_OK {
        return Err(prepare_error(db, sql));
    }
    if stmt.is_null() {
        return Ok(None);
    }
    Ok(Some(Statement { raw: stmt }))
}

fn nul_in_sql(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        code: None,
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn prepare_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe { (ffi::last_error_message(db), ffi::sqlite3_extended_errcode(db)) };
    // A generic error while compiling is a problem with the statement itself
    let kind = match error_code_to_kind(code) {
        QueryErrorKind::Database if code & 0xff == ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        kind => kind,
    };
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        code: Some(code),
        message,
        source: None,
    })
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe { (ffi::last_error_message(db), ffi::sqlite3_extended_errcode(db)) };
    Error::Query(QueryError {
        kind: QueryErrorKind::Bind,
        sql: Some(sql.to_string()),
        code: Some(code),
        message: format!("failed to bind parameter {}: {}", param_index, message),
        source: None,
    })
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe { (ffi::last_error_message(db), ffi::sqlite3_extended_errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        code: Some(code),
        message,
        source: None,
    })
}

/// Map an (extended) SQLite result code to a query error kind.
fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
        ffi::SQLITE_READONLY => QueryErrorKind::ReadOnly,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_RANGE | ffi::SQLITE_MISMATCH => QueryErrorKind::Bind,
        _ => QueryErrorKind::Database,
    }
}
