//! Bounded retry with jittered backoff around chaos-injected query attempts.

pub mod controller;
pub mod policy;

pub use controller::{RetryController, TaskOutcome, TaskState};
pub use policy::{DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS, RetryError, RetryPolicy};
