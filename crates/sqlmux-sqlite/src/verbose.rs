//! Process-wide verbose statement tracing.
//!
//! Verbose mode has a one-way lifecycle: it starts off, [`enable`] turns it
//! on for the rest of the process, and nothing turns it off again. Calling
//! [`enable`] more than once is harmless.
//!
//! Connections opened while verbose mode is on install a `sqlite3_trace_v2`
//! hook that logs every statement SQLite starts running at `debug` level.
//! Connections opened earlier are not affected.

use crate::ffi;
use std::ffi::{CStr, c_char, c_int, c_uint, c_void};
use std::sync::OnceLock;
use std::time::Instant;

/// Set once, when verbose mode is switched on.
static VERBOSE_SINCE: OnceLock<Instant> = OnceLock::new();

/// Turn verbose statement tracing on for the rest of the process.
///
/// Returns `true` if this call switched it on, `false` if it already was.
pub fn enable() -> bool {
    let mut switched = false;
    VERBOSE_SINCE.get_or_init(|| {
        switched = true;
        Instant::now()
    });
    if switched {
        tracing::debug!("verbose statement tracing enabled");
    }
    switched
}

/// Whether verbose mode has been switched on.
pub fn is_enabled() -> bool {
    VERBOSE_SINCE.get().is_some()
}

/// When verbose mode was switched on, if it has been.
pub fn enabled_since() -> Option<Instant> {
    VERBOSE_SINCE.get().copied()
}

unsafe extern "C" fn trace_statement(
    event: c_uint,
    _ctx: *mut c_void,
    _stmt: *mut c_void,
    sql: *mut c_void,
) -> c_int {
    if event == ffi::SQLITE_TRACE_STMT as c_uint && !sql.is_null() {
        // SAFETY: for SQLITE_TRACE_STMT the last argument is the statement's
        // NUL-terminated SQL text, valid for the duration of the callback
        let sql = unsafe { CStr::from_ptr(sql.cast::<c_char>()) }.to_string_lossy();
        tracing::debug!(target: "sqlmux::sqlite::trace", sql = %sql, "statement");
    }
    0
}

/// Install the statement hook on a freshly opened connection.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub(crate) unsafe fn install(db: *mut ffi::sqlite3) -> c_int {
    // SAFETY: caller guarantees db is valid; the callback has no context pointer
    unsafe {
        ffi::sqlite3_trace_v2(
            db,
            ffi::SQLITE_TRACE_STMT as c_uint,
            Some(trace_statement),
            std::ptr::null_mut(),
        )
    }
}
