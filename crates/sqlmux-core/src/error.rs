//! Error types for sqlmux operations.
//!
//! Every error is `Clone`: a row stream that terminates with an error hands
//! the same error back on every later poll, so sources are shared through
//! `Arc` rather than boxed.

use std::fmt;
use std::sync::Arc;

/// Shared, type-erased error source.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync>;

/// The primary error type for all sqlmux operations.
#[derive(Debug, Clone)]
pub enum Error {
    /// Caller contract violation (bad query object), raised before any lock
    Usage(UsageError),
    /// Statement rejected by the underlying engine
    Query(QueryError),
    /// Connection-related errors (open, closed, close failure)
    Connection(ConnectionError),
    /// Transaction lifecycle errors
    Transaction(TransactionError),
    /// Type conversion errors while reading rows
    Type(TypeError),
    /// Configuration errors
    Config(ConfigError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct UsageError {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// Engine-specific result code, when the driver reports one
    pub code: Option<i32>,
    pub message: String,
    pub source: Option<ErrorSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Write attempted on a read-only database
    ReadOnly,
    /// Data too large for column
    DataTruncation,
    /// Storage engine lock contention outlasted the busy timeout
    Busy,
    /// Parameter binding failed
    Bind,
    /// Other database error
    Database,
}

#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<ErrorSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the connection
    Connect,
    /// The connection has been disposed
    Closed,
    /// Closing the connection failed
    Close,
}

#[derive(Debug, Clone)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
    /// The driver error that caused this transaction error
    pub source: Option<ErrorSource>,
    /// The callback failure that was being rolled back, if any
    pub original: Option<Box<Error>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// ROLLBACK failed after the transaction body failed
    RollbackFailed,
    /// The transaction body panicked
    Panicked,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// The error returned by every operation on a disposed connection.
    pub fn closed() -> Self {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Closed,
            message: "connection is closed".to_string(),
            source: None,
        })
    }

    /// Build a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            message: message.into(),
        })
    }

    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    /// Is this the connection-closed error?
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                ..
            })
        )
    }

    /// Is this a caller contract violation?
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_))
    }

    /// Is this error likely to succeed on retry (busy timeout exceeded)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Busy,
            _ => false,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl TransactionError {
    /// The callback failure that was being rolled back when this error occurred.
    pub fn original(&self) -> Option<&Error> {
        self.original.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

fn as_dyn(source: &ErrorSource) -> &(dyn std::error::Error + 'static) {
    source.as_ref()
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e.source.as_ref().map(as_dyn),
            Error::Connection(e) => e.source.as_ref().map(as_dyn),
            Error::Transaction(e) => e.source.as_ref().map(as_dyn),
            _ => None,
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.original {
            Some(original) => write!(f, "{} (while handling: {})", self.message, original),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for QueryError {}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlmux operations.
pub type Result<T> = std::result::Result<T, Error>;
