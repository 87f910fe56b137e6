//! Query Chaos Harness engine.
//!
//! Runs a relational query workload while injecting faults, retries failed
//! queries with jittered backoff and folds the outcomes into per-task
//! metrics and a run summary.

pub mod analyzer;
pub mod chaos;
pub mod config;
pub mod db;
pub mod fixtures;
pub mod generator;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod util;

pub use analyzer::{EmptyRunError, RunSummary, summarize};
pub use chaos::{ChaosConfig, ChaosInjector, Fault, FaultFamily, FaultKind};
pub use config::{ConfigError, GeneratorKind, HarnessConfig, LoadedConfig, OutputFormat};
pub use db::{Database, DbError, ErrorClass, ResultSet, SqliteDatabase};
pub use generator::{CannedGenerator, GeneratorError, QueryGenerator, SCHEMA_DESCRIPTION};
pub use logging::{LogConfig, LogFormat, init_logging};
pub use metrics::{Metrics, MetricsLog, QueryTask};
pub use retry::{RetryController, RetryError, RetryPolicy, TaskOutcome};
pub use util::DurationRange;
