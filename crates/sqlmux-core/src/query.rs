//! Query objects and the dialect render contract.
//!
//! A query object is anything that can render itself into statement text
//! plus ordered parameter values for a given [`Dialect`]. The facade never
//! looks inside one; it only calls [`QueryObject::format`].

use crate::Result;
use crate::error::Error;
use crate::value::Value;

/// Identifier-escaping and placeholder rules of a storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// SQLite (uses ?1, ?2 placeholders and "double quoted" identifiers)
    #[default]
    Sqlite,
    /// PostgreSQL (uses $1, $2 placeholders)
    Postgres,
    /// MySQL (uses ? placeholders and `backtick` identifiers)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Postgres => format!("${index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote_identifier(self, name: &str) -> String {
        let quote = match self {
            Dialect::Sqlite | Dialect::Postgres => '"',
            Dialect::Mysql => '`',
        };
        let mut out = String::with_capacity(name.len() + 2);
        out.push(quote);
        for ch in name.chars() {
            if ch == quote {
                out.push(quote);
            }
            out.push(ch);
        }
        out.push(quote);
        out
    }
}

/// A statement rendered for one dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedQuery {
    pub text: String,
    pub params: Vec<Value>,
}

impl FormattedQuery {
    pub fn new(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }
}

/// The render contract every statement handed to the facade satisfies.
///
/// A rendering failure is a caller contract violation and should be
/// reported as [`Error::Usage`].
pub trait QueryObject {
    fn format(&self, dialect: Dialect) -> Result<FormattedQuery>;
}

impl QueryObject for FormattedQuery {
    fn format(&self, _dialect: Dialect) -> Result<FormattedQuery> {
        if self.text.trim().is_empty() {
            return Err(Error::usage("query text is empty"));
        }
        Ok(self.clone())
    }
}

impl<Q: QueryObject + ?Sized> QueryObject for &Q {
    fn format(&self, dialect: Dialect) -> Result<FormattedQuery> {
        (**self).format(dialect)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Fragment {
    Text(String),
    Bind(Value),
    Ident(String),
}

/// Minimal query object assembled from SQL text, bound values and identifiers.
///
/// ```rust,ignore
/// let stmt = Sql::new("SELECT * FROM ")
///     .ident("users")
///     .push(" WHERE id = ")
///     .bind(7_i64);
/// let q = stmt.format(Dialect::Sqlite)?;
/// assert_eq!(q.text, r#"SELECT * FROM "users" WHERE id = ?1"#);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sql {
    fragments: Vec<Fragment>,
}

impl Sql {
    /// Start a statement with raw SQL text.
    pub fn new(text: impl Into<String>) -> Self {
        Self::default().push(text)
    }

    /// Append raw SQL text.
    pub fn push(mut self, text: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Text(text.into()));
        self
    }

    /// Append a bound parameter, rendered as a dialect placeholder.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.fragments.push(Fragment::Bind(value.into()));
        self
    }

    /// Append a quoted identifier.
    pub fn ident(mut self, name: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Ident(name.into()));
        self
    }
}

impl QueryObject for Sql {
    fn format(&self, dialect: Dialect) -> Result<FormattedQuery> {
        let mut text = String::new();
        let mut params = Vec::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text(s) => text.push_str(s),
                Fragment::Bind(value) => {
                    params.push(value.clone());
                    text.push_str(&dialect.placeholder(params.len()));
                }
                Fragment::Ident(name) => {
                    if name.is_empty() || name.contains('\0') {
                        return Err(Error::usage(format!("invalid identifier {:?}", name)));
                    }
                    text.push_str(&dialect.quote_identifier(name));
                }
            }
        }
        if text.trim().is_empty() {
            return Err(Error::usage("query text is empty"));
        }
        Ok(FormattedQuery { text, params })
    }
}
