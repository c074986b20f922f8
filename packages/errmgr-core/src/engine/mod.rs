//! Execution engine used to persist and read back error rows.
//!
//! The engine runs single statements and multi-statement transactions,
//! retrying transient failures internally. Callers treat every call as
//! all-or-nothing.

mod retry;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ErrMgrError, Result};

pub use retry::{retry_transient, RetryOptions};
pub use sqlite::SqliteEngine;

/// A value bound to or read from a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns the integer value, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a blob or text column into raw bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            SqlValue::Blob(b) => Ok(b),
            SqlValue::Text(s) => Ok(s.into_bytes()),
            other => Err(ErrMgrError::Decode(format!(
                "expected bytes, got {:?}",
                other
            ))),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

/// One row returned by a query.
pub type Row = Vec<SqlValue>;

/// SQL text with positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl Statement {
    /// Creates a statement without arguments.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Creates a statement with positional arguments.
    pub fn with_args(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Statement executor handed to a transaction body.
pub trait TxnExecutor {
    /// Executes one statement inside the open transaction.
    fn execute(&mut self, stmt: &Statement) -> Result<u64>;
}

/// Body of a transaction. It may run more than once if the transaction is
/// retried, so it must not depend on state from a previous attempt.
pub type TxnBody = Arc<dyn Fn(&mut dyn TxnExecutor) -> Result<()> + Send + Sync>;

/// Retrying SQL execution engine.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Creates the namespace that holds the error tables if it is missing.
    async fn ensure_schema(&self, schema: &str) -> Result<()>;

    /// Executes a single statement and returns the number of affected rows.
    async fn execute(&self, label: &str, stmt: Statement) -> Result<u64>;

    /// Runs `body` inside one transaction, committing only if it succeeds.
    async fn transact(&self, label: &str, body: TxnBody) -> Result<()>;

    /// Runs a query and returns every row.
    async fn query(&self, label: &str, stmt: Statement) -> Result<Vec<Row>>;
}
