//! The seam between the locking layer and the SQL driver in use.
//!
//! Statements use `?` positional placeholders. Result rows of the most
//! recent `execute` are consumed through `fetch_one`/`fetch_all`.

use std::fmt;

/// One cell of a result row or one bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
}

impl SqlValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQL truthiness: NULL, 0, false and the empty string are all false.
    pub fn is_truthy(&self) -> bool {
        match self {
            SqlValue::Null => false,
            SqlValue::Int(i) => *i != 0,
            SqlValue::Text(s) => !s.is_empty(),
            SqlValue::Bool(b) => *b,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

pub type Row = Vec<SqlValue>;

/// Errors reported by the backend driver.
#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    /// A lock could not be granted within the active wait bound. Raised
    /// for both a native NOWAIT refusal and an elapsed wait timeout.
    #[error("lock not available: {0}")]
    LockNotAvailable(String),

    /// Any other statement failure.
    #[error("statement failed: {0}")]
    Statement(String),
}

impl DriverError {
    pub fn is_lock_not_available(&self) -> bool {
        matches!(self, DriverError::LockNotAvailable(_))
    }
}

/// A single backend connection with one active result stream.
pub trait Connection {
    fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<(), DriverError>;

    /// Next row of the current result, if any.
    fn fetch_one(&mut self) -> Result<Option<Row>, DriverError>;

    /// All remaining rows of the current result.
    fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError>;
}
