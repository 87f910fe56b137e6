//! SQLite backend for the database collaborator.
//!
//! Mirrors the session semantics of a client/server driver closely enough for
//! the fault catalogue to be meaningful:
//! - queries run inside an implicit transaction ended by commit/rollback
//! - `chaos_sleep(ms)` blocks inside the engine
//! - a progress handler enforces the session statement timeout
//! - terminating the backend closes the session; the next rollback reconnects

use crate::db::{Database, DbError, ResultSet};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// VM instructions between statement-timeout checks.
const PROGRESS_OPS: i32 = 1_000;

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DB_FILE_NAME: &str = "harness.db";

#[derive(Debug, Default)]
struct StatementClock {
    timeout: Option<Duration>,
    started: Option<Instant>,
}

impl StatementClock {
    fn expired(&self) -> bool {
        match (self.timeout, self.started) {
            (Some(timeout), Some(started)) => started.elapsed() > timeout,
            _ => false,
        }
    }
}

type SharedClock = Arc<Mutex<StatementClock>>;

fn lock(clock: &SharedClock) -> MutexGuard<'_, StatementClock> {
    clock.lock().unwrap_or_else(|e| e.into_inner())
}

/// File-backed SQLite session.
pub struct SqliteDatabase {
    path: PathBuf,
    conn: Option<Connection>,
    clock: SharedClock,
    // Declared after `conn` so the session closes before the directory is removed.
    tempdir: Option<TempDir>,
}

impl SqliteDatabase {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let clock = SharedClock::default();
        let conn = connect(&path, &clock)?;
        info!(path = %path.display(), "Opened SQLite database");
        Ok(Self {
            path,
            conn: Some(conn),
            clock,
            tempdir: None,
        })
    }

    /// Provision a throwaway database in a temporary directory.
    ///
    /// The directory is removed when the handle is dropped.
    pub fn ephemeral() -> Result<Self, DbError> {
        let dir = tempfile::Builder::new()
            .prefix("qch-")
            .tempdir()
            .map_err(|e| DbError::Other(format!("failed to create temp dir: {e}")))?;
        let mut db = Self::open(dir.path().join(DB_FILE_NAME))?;
        db.tempdir = Some(dir);
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the session is currently open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Borrow the live connection (fixture loading, inspection).
    pub fn connection_mut(&mut self) -> Result<&mut Connection, DbError> {
        self.conn.as_mut().ok_or_else(session_closed)
    }

    /// Currently armed statement timeout, if any.
    pub fn statement_timeout(&self) -> Option<Duration> {
        lock(&self.clock).timeout
    }
}

impl Database for SqliteDatabase {
    fn query(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        let conn = self.conn.as_ref().ok_or_else(session_closed)?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN").map_err(map_error)?;
        }

        lock(&self.clock).started = Some(Instant::now());
        let result = fetch_all(conn, sql);
        lock(&self.clock).started = None;

        let rows = result.map_err(map_error)?;
        debug!(rows = rows.len(), "Query returned");
        Ok(rows)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        let conn = self.conn.as_ref().ok_or_else(session_closed)?;
        lock(&self.clock).started = Some(Instant::now());
        let result = conn.execute_batch(sql);
        lock(&self.clock).started = None;
        result.map_err(map_error)
    }

    fn commit(&mut self) -> Result<(), DbError> {
        let conn = self.conn.as_ref().ok_or_else(session_closed)?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("COMMIT").map_err(map_error)
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        match self.conn.as_ref() {
            None => {
                info!(path = %self.path.display(), "Session was terminated, reconnecting");
                let conn = connect(&self.path, &self.clock)?;
                self.conn = Some(conn);
                Ok(())
            }
            Some(conn) if !conn.is_autocommit() => {
                conn.execute_batch("ROLLBACK").map_err(map_error)
            }
            Some(_) => Ok(()),
        }
    }

    fn induce_sleep(&mut self, duration: Duration) -> Result<(), DbError> {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.execute_batch(&format!("SELECT chaos_sleep({millis});"))
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), DbError> {
        if self.conn.is_none() {
            return Err(session_closed());
        }
        debug!(timeout_ms = timeout.as_millis() as u64, "Arming statement timeout");
        lock(&self.clock).timeout = Some(timeout);
        Ok(())
    }

    fn terminate_backend(&mut self) -> Result<(), DbError> {
        match self.conn.take() {
            Some(conn) => {
                if let Err((_, e)) = conn.close() {
                    warn!(error = %e, "Error while closing terminated session");
                }
                Ok(())
            }
            None => Err(session_closed()),
        }
    }
}

fn session_closed() -> DbError {
    DbError::ConnectionLost("terminating connection due to administrator command".to_string())
}

fn connect(path: &Path, clock: &SharedClock) -> Result<Connection, DbError> {
    let conn = Connection::open(path).map_err(|e| DbError::ConnectionLost(e.to_string()))?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(map_error)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(map_error)?;

    conn.create_scalar_function("chaos_sleep", 1, FunctionFlags::SQLITE_UTF8, |ctx| {
        let millis: i64 = ctx.get(0)?;
        std::thread::sleep(Duration::from_millis(millis.max(0) as u64));
        Ok(millis)
    })
    .map_err(map_error)?;

    // A fresh session starts without a statement timeout.
    lock(clock).timeout = None;
    let handler_clock = Arc::clone(clock);
    conn.progress_handler(PROGRESS_OPS, Some(move || lock(&handler_clock).expired()));

    Ok(conn)
}

fn fetch_all(conn: &Connection, sql: &str) -> rusqlite::Result<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for idx in 0..width {
            cells.push(cell_to_json(row.get_ref(idx)?));
        }
        out.push(cells);
    }

    Ok(ResultSet::new(columns, out))
}

fn cell_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(bytes) => {
            serde_json::Value::from(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::from(format!("<blob {} bytes>", bytes.len())),
    }
}

fn is_query_text_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["syntax error", "no such", "incomplete input", "unrecognized token"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn map_error(err: rusqlite::Error) -> DbError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let text = message.clone().unwrap_or_else(|| failure.to_string());
        return match failure.code {
            ErrorCode::ConstraintViolation => DbError::Constraint(text),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => DbError::Busy(text),
            // Only the statement-timeout progress handler interrupts statements.
            ErrorCode::OperationInterrupted => DbError::StatementTimeout,
            ErrorCode::CannotOpen | ErrorCode::NotADatabase => DbError::ConnectionLost(text),
            _ if is_query_text_error(&text) => DbError::Syntax(text),
            _ => DbError::Other(text),
        };
    }

    let text = err.to_string();
    if is_query_text_error(&text) {
        DbError::Syntax(text)
    } else {
        DbError::Other(text)
    }
}
