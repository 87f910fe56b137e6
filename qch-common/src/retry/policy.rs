//! Retry policy for query tasks.
//!
//! Attempts are bounded by `max_attempts`; the delay before the retry that
//! follows attempt `n` is drawn uniformly from the backoff window scaled by
//! `n`, spreading repeated contention instead of retrying immediately.

use crate::util::DurationRange;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: DurationRange = DurationRange::from_millis(100, 500);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),
}

/// Bounded retry with linearly scaled, jittered backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try (minimum 1).
    pub max_attempts: u32,
    /// Backoff window for the first retry; later retries scale it.
    pub backoff: DurationRange,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: DurationRange) -> Result<Self, RetryError> {
        let policy = Self {
            max_attempts,
            backoff,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts < 1 {
            return Err(RetryError::InvalidMaxAttempts(self.max_attempts));
        }
        Ok(())
    }

    /// Backoff delay after a failed attempt (1-based).
    pub fn backoff_delay(&self, attempt: u32, rng: &mut fastrand::Rng) -> Duration {
        self.backoff.scaled(attempt.max(1)).sample(rng)
    }

    /// Window `backoff_delay` draws from for `attempt`.
    pub fn backoff_window(&self, attempt: u32) -> DurationRange {
        self.backoff.scaled(attempt.max(1))
    }
}
