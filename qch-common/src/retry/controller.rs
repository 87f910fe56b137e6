//! Retry controller: chaos, execution and backoff for one query task.
//!
//! Each task walks an explicit state machine:
//!
//! ```text
//! Pending -> Attempting -> Succeeded
//!                       -> Retrying -> Attempting ...
//!                       -> Exhausted
//! ```
//!
//! Every attempt first gives the chaos injector a chance to fire, then runs
//! the query. Database errors never escape: a failed attempt is rolled back
//! and becomes data on the task's metrics record.

use crate::chaos::ChaosInjector;
use crate::db::{Database, ResultSet};
use crate::metrics::{self, AttemptOutcome, Metrics, QueryTask, TerminalState};
use crate::retry::policy::{RetryError, RetryPolicy};
use chrono::Utc;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Position of a task in the retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Attempting { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl TaskState {
    /// Start the next attempt. Other states are returned unchanged.
    pub fn begin_attempt(self) -> Self {
        match self {
            Self::Pending => Self::Attempting { attempt: 1 },
            Self::Retrying { attempt } => Self::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    /// Resolve the attempt in flight. Other states are returned unchanged.
    pub fn resolve(self, succeeded: bool, max_attempts: u32) -> Self {
        match self {
            Self::Attempting { attempt } if succeeded => Self::Succeeded { attempts: attempt },
            Self::Attempting { attempt } if attempt < max_attempts => Self::Retrying { attempt },
            Self::Attempting { attempt } => Self::Exhausted { attempts: attempt },
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Exhausted { .. })
    }
}

/// Metrics for a finished task, plus its rows when it succeeded.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub metrics: Metrics,
    pub results: Option<ResultSet>,
}

pub struct RetryController {
    chaos: ChaosInjector,
    policy: RetryPolicy,
    rng: fastrand::Rng,
}

impl RetryController {
    pub fn new(chaos: ChaosInjector, policy: RetryPolicy) -> Result<Self, RetryError> {
        Self::with_rng(chaos, policy, fastrand::Rng::new())
    }

    /// Reproducible backoff jitter.
    pub fn with_seed(
        chaos: ChaosInjector,
        policy: RetryPolicy,
        seed: u64,
    ) -> Result<Self, RetryError> {
        Self::with_rng(chaos, policy, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(
        chaos: ChaosInjector,
        policy: RetryPolicy,
        rng: fastrand::Rng,
    ) -> Result<Self, RetryError> {
        policy.validate()?;
        Ok(Self { chaos, policy, rng })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn chaos(&self) -> &ChaosInjector {
        &self.chaos
    }

    /// Run a task under the controller's own attempt budget.
    pub async fn execute_task<D: Database>(&mut self, db: &mut D, task: &QueryTask) -> TaskOutcome {
        let max_attempts = self.policy.max_attempts;
        self.run(db, task, max_attempts).await
    }

    /// Run a task with an explicit attempt budget.
    ///
    /// Only a budget below 1 is an error; query failures are reported through
    /// the returned metrics.
    pub async fn execute_with_retry<D: Database>(
        &mut self,
        db: &mut D,
        task: &QueryTask,
        max_attempts: u32,
    ) -> Result<TaskOutcome, RetryError> {
        if max_attempts < 1 {
            return Err(RetryError::InvalidMaxAttempts(max_attempts));
        }
        Ok(self.run(db, task, max_attempts).await)
    }

    async fn run<D: Database>(
        &mut self,
        db: &mut D,
        task: &QueryTask,
        max_attempts: u32,
    ) -> TaskOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut attempts: Vec<AttemptOutcome> = Vec::new();
        let mut results = None;
        let mut state = TaskState::Pending;

        debug!(task = %task.id, max_attempts, "Starting task");

        while !state.is_terminal() {
            state = match state {
                TaskState::Pending => state.begin_attempt(),
                TaskState::Attempting { attempt } => {
                    let (outcome, rows) = self.attempt(db, task, attempt).await;
                    let next = state.resolve(outcome.succeeded(), max_attempts);
                    attempts.push(outcome);
                    if rows.is_some() {
                        results = rows;
                    }
                    next
                }
                TaskState::Retrying { attempt } => {
                    let delay = self.policy.backoff_delay(attempt, &mut self.rng);
                    info!(
                        task = %task.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    sleep(delay).await;
                    state.begin_attempt()
                }
                TaskState::Succeeded { .. } | TaskState::Exhausted { .. } => state,
            };
        }

        let terminal = TerminalState {
            attempts,
            started_at,
            elapsed: clock.elapsed(),
        };
        let metrics = metrics::record(task, &terminal);

        match state {
            TaskState::Succeeded { attempts } => info!(
                task = %task.id,
                attempts,
                rows = metrics.rows_returned,
                elapsed_ms = metrics.execution_time.as_millis() as u64,
                "Task succeeded"
            ),
            _ => warn!(
                task = %task.id,
                attempts = metrics.attempts,
                error_class = ?metrics.error_class,
                "Task failed after all attempts"
            ),
        }

        TaskOutcome { metrics, results }
    }

    async fn attempt<D: Database>(
        &mut self,
        db: &mut D,
        task: &QueryTask,
        attempt: u32,
    ) -> (AttemptOutcome, Option<ResultSet>) {
        let started = Instant::now();
        let chaos = self.chaos.maybe_inject_fault(db).await;

        let result = db.query(&task.sql).and_then(|rows| db.commit().map(|()| rows));

        match result {
            Ok(rows) => {
                debug!(task = %task.id, attempt, rows = rows.len(), "Attempt succeeded");
                let outcome = AttemptOutcome {
                    attempt,
                    chaos,
                    elapsed: started.elapsed(),
                    result: Ok(rows.len()),
                };
                (outcome, Some(rows))
            }
            Err(err) => {
                if let Err(rollback_err) = db.rollback() {
                    warn!(
                        task = %task.id,
                        attempt,
                        error = %rollback_err,
                        "Rollback after failed attempt failed"
                    );
                }
                warn!(
                    task = %task.id,
                    attempt,
                    error_class = %err.class(),
                    error = %err,
                    "Attempt failed"
                );
                let outcome = AttemptOutcome {
                    attempt,
                    chaos,
                    elapsed: started.elapsed(),
                    result: Err(err),
                };
                (outcome, None)
            }
        }
    }
}
