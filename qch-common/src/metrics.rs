//! Per-task metrics records.
//!
//! The retry controller hands the terminal state of each task to [`record`],
//! which folds the per-attempt outcomes into one immutable [`Metrics`] value.
//! [`MetricsLog`] keeps the records in submission order and can append each
//! one to a JSONL file as it is produced.

use crate::chaos::FaultKind;
use crate::db::{DbError, ErrorClass};
use crate::util::duration_secs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::OpenOptions as AsyncOpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// One unit of work: a query and the prompt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTask {
    pub id: Uuid,
    pub prompt: String,
    pub sql: String,
}

impl QueryTask {
    pub fn new(prompt: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            sql: sql.into(),
        }
    }

    /// A task whose identity is the query text itself.
    pub fn from_sql(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self::new(sql.clone(), sql)
    }
}

/// Result of a single execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Fault that fired before this attempt, if any.
    pub chaos: Option<FaultKind>,
    /// Time spent on fault injection plus execution.
    pub elapsed: Duration,
    /// Row count on success.
    pub result: Result<usize, DbError>,
}

impl AttemptOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&DbError> {
        self.result.as_ref().err()
    }
}

/// Everything the controller knows once a task stops.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalState {
    /// Attempts in order; never empty.
    pub attempts: Vec<AttemptOutcome>,
    pub started_at: DateTime<Utc>,
    /// Wall-clock span from the first attempt's start to the last attempt's
    /// end, backoff included.
    pub elapsed: Duration,
}

impl TerminalState {
    pub fn succeeded(&self) -> bool {
        self.attempts.last().is_some_and(AttemptOutcome::succeeded)
    }
}

/// Outcome record for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub task_id: Uuid,
    pub prompt: String,
    pub sql_query: String,
    pub success: bool,
    /// Attempts consumed, `1 + retries`.
    pub attempts: u32,
    #[serde(rename = "execution_time_secs", with = "duration_secs")]
    pub execution_time: Duration,
    /// Classification of the last failed attempt; `None` on success.
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    /// Rows from the successful attempt; 0 if none succeeded.
    pub rows_returned: usize,
    /// First fault that fired during the task.
    pub chaos: Option<FaultKind>,
    pub timestamp: DateTime<Utc>,
}

impl Metrics {
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn is_chaos_incident(&self) -> bool {
        self.chaos.is_some()
    }
}

/// Fold a task's terminal state into its metrics record.
pub fn record(task: &QueryTask, state: &TerminalState) -> Metrics {
    debug_assert!(!state.attempts.is_empty(), "terminal state without attempts");

    let success = state.succeeded();
    let rows_returned = match state.attempts.last().map(|a| &a.result) {
        Some(Ok(rows)) => *rows,
        _ => 0,
    };
    let last_error = if success {
        None
    } else {
        state.attempts.iter().rev().find_map(AttemptOutcome::error)
    };

    Metrics {
        task_id: task.id,
        prompt: task.prompt.clone(),
        sql_query: task.sql.clone(),
        success,
        attempts: state.attempts.len() as u32,
        execution_time: state.elapsed,
        error_class: last_error.map(DbError::class),
        error_message: last_error.map(ToString::to_string),
        rows_returned,
        chaos: state.attempts.iter().find_map(|a| a.chaos),
        timestamp: state.started_at,
    }
}

#[derive(Debug, Error)]
pub enum MetricsLogError {
    #[error("failed to read metrics file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metrics record at {path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Metrics records of one run, in submission order.
#[derive(Debug, Default)]
pub struct MetricsLog {
    records: Vec<Metrics>,
    persistence_path: Option<PathBuf>,
}

impl MetricsLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every record to `path` as JSON lines.
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persistence_path = Some(path);
        self
    }

    /// Add a record, persisting it when enabled.
    ///
    /// Persistence failures are logged; the in-memory log is always updated.
    pub async fn push(&mut self, metrics: Metrics) {
        if let Some(path) = &self.persistence_path
            && let Err(e) = Self::persist_record(path, &metrics).await
        {
            warn!(path = %path.display(), error = %e, "Failed to persist metrics record");
        }
        self.records.push(metrics);
    }

    pub fn records(&self) -> &[Metrics] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Metrics> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn persist_record(path: &Path, metrics: &Metrics) -> std::io::Result<()> {
        let mut line = serde_json::to_string(metrics).map_err(std::io::Error::other)?;
        line.push('\n');

        let mut file = AsyncOpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), task = %metrics.task_id, "Persisted metrics record");
        Ok(())
    }

    /// Load records previously written with persistence enabled.
    ///
    /// Blank lines are skipped.
    pub fn load_jsonl(path: &Path) -> Result<Vec<Metrics>, MetricsLogError> {
        let io_err = |source| MetricsLogError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|source| MetricsLogError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }
}
