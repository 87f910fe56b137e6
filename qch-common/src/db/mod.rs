//! Database collaborator boundary.
//!
//! The harness drives a live database through the [`Database`] trait. Any
//! error surfaced by a backend is a [`DbError`], and every `DbError` is
//! treated as recoverable by retry. The fault hooks (`induce_sleep`,
//! `set_statement_timeout`, `terminate_backend`) let the chaos injector
//! stress the session without knowing which backend is underneath.

pub mod mock;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use mock::{MockCall, MockDatabase, MockResponse};
pub use sqlite::SqliteDatabase;

/// Classification of a failed database operation.
///
/// Stored on metrics records in place of the raw error so failures can be
/// grouped across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed query text.
    Syntax,
    /// Constraint or integrity violation.
    Constraint,
    /// Statement cancelled by the session timeout.
    StatementTimeout,
    /// Session closed underneath the caller.
    ConnectionLost,
    /// Lock contention or busy backend.
    Busy,
    /// Anything the backend did not classify further.
    Other,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Constraint => "constraint",
            Self::StatementTimeout => "statement_timeout",
            Self::ConnectionLost => "connection_lost",
            Self::Busy => "busy",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a database backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("canceling statement due to statement timeout")]
    StatementTimeout,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("database busy: {0}")]
    Busy(String),

    #[error("database error: {0}")]
    Other(String),
}

impl DbError {
    /// Classification recorded on metrics.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Syntax(_) => ErrorClass::Syntax,
            Self::Constraint(_) => ErrorClass::Constraint,
            Self::StatementTimeout => ErrorClass::StatementTimeout,
            Self::ConnectionLost(_) => ErrorClass::ConnectionLost,
            Self::Busy(_) => ErrorClass::Busy,
            Self::Other(_) => ErrorClass::Other,
        }
    }
}

/// Rows fetched by a query, cells rendered as JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A connection with execute/fetch/commit/rollback semantics.
///
/// One handle is owned exclusively by the retry controller for the duration
/// of a task; implementations need not be thread-safe.
pub trait Database {
    /// Execute a query and fetch every row it produces.
    ///
    /// Opens a transaction if none is active; the caller ends it with
    /// [`Database::commit`] or [`Database::rollback`].
    fn query(&mut self, sql: &str) -> Result<ResultSet, DbError>;

    /// Execute one or more statements, discarding any rows.
    fn execute_batch(&mut self, sql: &str) -> Result<(), DbError>;

    /// Commit the open transaction, if any.
    fn commit(&mut self) -> Result<(), DbError>;

    /// Roll back the open transaction, if any, leaving a clean session.
    fn rollback(&mut self) -> Result<(), DbError>;

    /// Block inside the database for `duration`.
    fn induce_sleep(&mut self, duration: Duration) -> Result<(), DbError>;

    /// Lower the maximum execution time of subsequent statements in this session.
    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), DbError>;

    /// Force the current backend session to abort.
    fn terminate_backend(&mut self) -> Result<(), DbError>;
}
