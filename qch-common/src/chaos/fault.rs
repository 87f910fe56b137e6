//! Fault catalogue.
//!
//! Each [`Fault`] variant carries its own parameters and knows how to execute
//! itself. Database-family faults act on the live session; process-family
//! faults only consume time or CPU on the harness side.

use crate::db::{Database, DbError};
use crate::util::DurationRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SLOW_QUERY: Duration = Duration::from_secs(2);
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_TEMP_TABLE_ROWS: u32 = 50_000;
pub const DEFAULT_CPU_STRESS: DurationRange = DurationRange::from_millis(500, 1_500);
pub const DEFAULT_NETWORK_LATENCY: DurationRange = DurationRange::from_millis(100, 500);
pub const DEFAULT_NETWORK_TIMEOUT: DurationRange = DurationRange::from_millis(1_000, 3_000);
pub const DEFAULT_NETWORK_PARTITION: DurationRange = DurationRange::from_millis(2_000, 5_000);

/// Where a fault acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultFamily {
    /// Needs the live connection.
    Database,
    /// Harness process or simulated network; never touches the connection.
    Process,
}

impl fmt::Display for FaultFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Identifier of an injected fault, recorded on metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    SlowQuery,
    StatementTimeout,
    KillConnection,
    TempTableStress,
    CpuStress,
    NetworkLatency,
    NetworkTimeout,
    NetworkPartition,
}

impl FaultKind {
    pub const ALL: [FaultKind; 8] = [
        FaultKind::SlowQuery,
        FaultKind::StatementTimeout,
        FaultKind::KillConnection,
        FaultKind::TempTableStress,
        FaultKind::CpuStress,
        FaultKind::NetworkLatency,
        FaultKind::NetworkTimeout,
        FaultKind::NetworkPartition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlowQuery => "slow_query",
            Self::StatementTimeout => "statement_timeout",
            Self::KillConnection => "kill_connection",
            Self::TempTableStress => "temp_table_stress",
            Self::CpuStress => "cpu_stress",
            Self::NetworkLatency => "network_latency",
            Self::NetworkTimeout => "network_timeout",
            Self::NetworkPartition => "network_partition",
        }
    }

    pub fn family(&self) -> FaultFamily {
        match self {
            Self::SlowQuery
            | Self::StatementTimeout
            | Self::KillConnection
            | Self::TempTableStress => FaultFamily::Database,
            Self::CpuStress
            | Self::NetworkLatency
            | Self::NetworkTimeout
            | Self::NetworkPartition => FaultFamily::Process,
        }
    }

    /// The fault with its default parameters.
    pub fn default_fault(&self) -> Fault {
        match self {
            Self::SlowQuery => Fault::SlowQuery {
                duration: DEFAULT_SLOW_QUERY,
            },
            Self::StatementTimeout => Fault::StatementTimeout {
                timeout: DEFAULT_STATEMENT_TIMEOUT,
            },
            Self::KillConnection => Fault::KillConnection,
            Self::TempTableStress => Fault::TempTableStress {
                rows: DEFAULT_TEMP_TABLE_ROWS,
            },
            Self::CpuStress => Fault::CpuStress {
                busy: DEFAULT_CPU_STRESS,
            },
            Self::NetworkLatency => Fault::NetworkLatency {
                delay: DEFAULT_NETWORK_LATENCY,
            },
            Self::NetworkTimeout => Fault::NetworkTimeout {
                delay: DEFAULT_NETWORK_TIMEOUT,
            },
            Self::NetworkPartition => Fault::NetworkPartition {
                delay: DEFAULT_NETWORK_PARTITION,
            },
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fault kind '{0}'")]
pub struct UnknownFaultKind(pub String);

impl FromStr for FaultKind {
    type Err = UnknownFaultKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "slow_query" | "long_query" => Ok(Self::SlowQuery),
            "statement_timeout" | "timeout" => Ok(Self::StatementTimeout),
            "kill_connection" => Ok(Self::KillConnection),
            "temp_table_stress" => Ok(Self::TempTableStress),
            "cpu_stress" | "resource_constraint" => Ok(Self::CpuStress),
            "network_latency" | "latency" => Ok(Self::NetworkLatency),
            "network_timeout" => Ok(Self::NetworkTimeout),
            "network_partition" | "partition" => Ok(Self::NetworkPartition),
            _ => Err(UnknownFaultKind(s.to_string())),
        }
    }
}

/// Failure while executing a fault. Always swallowed by the injector.
#[derive(Debug, Error)]
pub enum FaultError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error("cpu stress worker failed: {0}")]
    Worker(String),
}

/// One catalogue entry with its execution parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Block inside the database.
    SlowQuery { duration: Duration },
    /// Lower the session's statement timeout.
    StatementTimeout { timeout: Duration },
    /// Abort the current backend session.
    KillConnection,
    /// Create and drop a large temporary table.
    TempTableStress { rows: u32 },
    /// Busy a worker thread for a random duration.
    CpuStress { busy: DurationRange },
    /// Delay representing network latency.
    NetworkLatency { delay: DurationRange },
    /// Delay representing a network timeout.
    NetworkTimeout { delay: DurationRange },
    /// Delay representing a network partition.
    NetworkPartition { delay: DurationRange },
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::SlowQuery { .. } => FaultKind::SlowQuery,
            Self::StatementTimeout { .. } => FaultKind::StatementTimeout,
            Self::KillConnection => FaultKind::KillConnection,
            Self::TempTableStress { .. } => FaultKind::TempTableStress,
            Self::CpuStress { .. } => FaultKind::CpuStress,
            Self::NetworkLatency { .. } => FaultKind::NetworkLatency,
            Self::NetworkTimeout { .. } => FaultKind::NetworkTimeout,
            Self::NetworkPartition { .. } => FaultKind::NetworkPartition,
        }
    }

    pub fn family(&self) -> FaultFamily {
        self.kind().family()
    }

    /// Every fault kind with default parameters.
    pub fn full_catalogue() -> Vec<Fault> {
        FaultKind::ALL.iter().map(FaultKind::default_fault).collect()
    }

    /// Run the fault. Database faults commit afterwards so their effects
    /// persist in the session.
    pub async fn execute<D: Database>(
        &self,
        db: &mut D,
        rng: &mut fastrand::Rng,
    ) -> Result<(), FaultError> {
        match self {
            Self::SlowQuery { duration } => db.induce_sleep(*duration)?,
            Self::StatementTimeout { timeout } => db.set_statement_timeout(*timeout)?,
            Self::KillConnection => db.terminate_backend()?,
            Self::TempTableStress { rows } => db.execute_batch(&temp_table_sql(*rows))?,
            Self::CpuStress { busy } => burn_cpu(busy.sample(rng)).await?,
            Self::NetworkLatency { delay }
            | Self::NetworkTimeout { delay }
            | Self::NetworkPartition { delay } => {
                let pause = delay.sample(rng);
                debug!(
                    fault = %self.kind(),
                    delay_ms = pause.as_millis() as u64,
                    "Simulated network delay"
                );
                tokio::time::sleep(pause).await;
            }
        }

        if self.family() == FaultFamily::Database {
            db.commit()?;
        }
        Ok(())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlowQuery { duration } => {
                write!(f, "sleep {}ms inside the database", duration.as_millis())
            }
            Self::StatementTimeout { timeout } => {
                write!(f, "set session statement timeout to {}ms", timeout.as_millis())
            }
            Self::KillConnection => write!(f, "terminate the current backend session"),
            Self::TempTableStress { rows } => {
                write!(f, "create and drop a {rows}-row temporary table")
            }
            Self::CpuStress { busy } => write!(f, "busy a worker thread for {busy}"),
            Self::NetworkLatency { delay } => write!(f, "network latency of {delay}"),
            Self::NetworkTimeout { delay } => write!(f, "network timeout stall of {delay}"),
            Self::NetworkPartition { delay } => write!(f, "network partition lasting {delay}"),
        }
    }
}

fn temp_table_sql(rows: u32) -> String {
    format!(
        "CREATE TEMP TABLE chaos_stress AS \
         WITH RECURSIVE series(id) AS \
         (SELECT 1 UNION ALL SELECT id + 1 FROM series WHERE id < {rows}) \
         SELECT id FROM series;\n\
         DROP TABLE chaos_stress;"
    )
}

/// Spin on a blocking worker so the async scheduler thread stays free.
async fn burn_cpu(duration: Duration) -> Result<(), FaultError> {
    debug!(busy_ms = duration.as_millis() as u64, "Starting CPU stress");
    tokio::task::spawn_blocking(move || {
        let deadline = Instant::now() + duration;
        let mut acc: u64 = 0x9E37_79B9_7F4A_7C15;
        while Instant::now() < deadline {
            for _ in 0..1_000 {
                acc = acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            }
            std::hint::black_box(acc);
        }
    })
    .await
    .map_err(|e| FaultError::Worker(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockCall, MockDatabase};

    #[test]
    fn test_every_kind_round_trips_through_str() {
        for kind in FaultKind::ALL {
            assert_eq!(kind.as_str().parse::<FaultKind>().unwrap(), kind);
            assert_eq!(kind.default_fault().kind(), kind);
        }
    }

    #[test]
    fn test_legacy_names_parse() {
        assert_eq!("long_query".parse::<FaultKind>().unwrap(), FaultKind::SlowQuery);
        assert_eq!("timeout".parse::<FaultKind>().unwrap(), FaultKind::StatementTimeout);
        assert_eq!("Kill-Connection".parse::<FaultKind>().unwrap(), FaultKind::KillConnection);
        assert!("meteor_strike".parse::<FaultKind>().is_err());
    }

    #[test]
    fn test_families() {
        assert_eq!(FaultKind::SlowQuery.family(), FaultFamily::Database);
        assert_eq!(FaultKind::TempTableStress.family(), FaultFamily::Database);
        assert_eq!(FaultKind::CpuStress.family(), FaultFamily::Process);
        assert_eq!(FaultKind::NetworkPartition.family(), FaultFamily::Process);
        let db_faults = Fault::full_catalogue()
            .iter()
            .filter(|f| f.family() == FaultFamily::Database)
            .count();
        assert_eq!(db_faults, 4);
    }

    #[test]
    fn test_temp_table_sql_mentions_row_count() {
        let sql = temp_table_sql(1234);
        assert!(sql.contains("id < 1234"));
        assert!(sql.contains("DROP TABLE chaos_stress"));
    }

    #[tokio::test]
    async fn test_database_fault_uses_connection_and_commits() {
        let mut db = MockDatabase::succeeding(0);
        let mut rng = fastrand::Rng::with_seed(3);
        Fault::SlowQuery {
            duration: Duration::from_millis(5),
        }
        .execute(&mut db, &mut rng)
        .await
        .unwrap();

        assert_eq!(
            db.calls(),
            &[MockCall::InduceSleep(Duration::from_millis(5)), MockCall::Commit]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_fault_never_touches_connection() {
        let mut db = MockDatabase::succeeding(0);
        let mut rng = fastrand::Rng::with_seed(3);
        let start = tokio::time::Instant::now();
        Fault::NetworkLatency {
            delay: DurationRange::from_millis(100, 200),
        }
        .execute(&mut db, &mut rng)
        .await
        .unwrap();

        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100) && waited <= Duration::from_millis(200));
        assert!(db.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cpu_stress_runs_on_worker() {
        let mut db = MockDatabase::succeeding(0);
        let mut rng = fastrand::Rng::with_seed(3);
        let start = Instant::now();
        Fault::CpuStress {
            busy: DurationRange::from_millis(20, 20),
        }
        .execute(&mut db, &mut rng)
        .await
        .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(db.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fault_error_surfaces_from_hook() {
        let mut db = MockDatabase::succeeding(0).with_failing_fault_hooks();
        let mut rng = fastrand::Rng::with_seed(3);
        let err = Fault::KillConnection
            .execute(&mut db, &mut rng)
            .await
            .unwrap_err();
        assert!(matches!(err, FaultError::Database(DbError::ConnectionLost(_))));
    }
}
