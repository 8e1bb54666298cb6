//! Core types and traits for sqlmux.
//!
//! This crate provides the pieces shared by the facade and its drivers:
//!
//! - `Value` and `Row` for parameters and results
//! - `Error`, the crate-wide error taxonomy
//! - `QueryObject`, `Dialect` and the minimal `Sql` query object
//! - `Driver` and `RowSink`, the black-box connection contract
//! - `Outcome` and `Cx` re-exported from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod driver;
pub mod error;
pub mod query;
pub mod row;
pub mod value;

pub use driver::{Driver, RowSink};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    TransactionError, TransactionErrorKind, TypeError, UsageError,
};
pub use query::{Dialect, FormattedQuery, QueryObject, Sql};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
