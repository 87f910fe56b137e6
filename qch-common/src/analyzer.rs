//! Run-level aggregation of task metrics.

use crate::chaos::FaultKind;
use crate::db::ErrorClass;
use crate::metrics::Metrics;
use crate::util::duration_secs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot summarize a run with no recorded tasks")]
pub struct EmptyRunError;

/// Aggregates over every task of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub successes: usize,
    pub failures: usize,
    /// `successes / total_tasks`, in `[0, 1]`.
    pub success_rate: f64,
    #[serde(rename = "mean_execution_time_secs", with = "duration_secs")]
    pub mean_execution_time: Duration,
    #[serde(rename = "min_execution_time_secs", with = "duration_secs")]
    pub min_execution_time: Duration,
    #[serde(rename = "max_execution_time_secs", with = "duration_secs")]
    pub max_execution_time: Duration,
    pub total_retries: u64,
    /// Tasks with a recorded fault.
    pub chaos_incidents: usize,
    pub total_rows: u64,
    pub incidents_by_fault: BTreeMap<FaultKind, usize>,
    pub failures_by_class: BTreeMap<ErrorClass, usize>,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Summarize a run in a single pass.
///
/// Every aggregate is order-independent, so any permutation of `records`
/// yields an identical summary.
pub fn summarize(records: &[Metrics]) -> Result<RunSummary, EmptyRunError> {
    if records.is_empty() {
        return Err(EmptyRunError);
    }

    let mut successes = 0usize;
    let mut total_time = Duration::ZERO;
    let mut min_time = Duration::MAX;
    let mut max_time = Duration::ZERO;
    let mut total_retries = 0u64;
    let mut chaos_incidents = 0usize;
    let mut total_rows = 0u64;
    let mut incidents_by_fault = BTreeMap::new();
    let mut failures_by_class = BTreeMap::new();

    for m in records {
        if m.success {
            successes += 1;
        } else if let Some(class) = m.error_class {
            *failures_by_class.entry(class).or_insert(0) += 1;
        }
        total_time = total_time.saturating_add(m.execution_time);
        min_time = min_time.min(m.execution_time);
        max_time = max_time.max(m.execution_time);
        total_retries += u64::from(m.retry_count());
        total_rows += m.rows_returned as u64;
        if let Some(kind) = m.chaos {
            chaos_incidents += 1;
            *incidents_by_fault.entry(kind).or_insert(0) += 1;
        }
    }

    let total = records.len();
    Ok(RunSummary {
        total_tasks: total,
        successes,
        failures: total - successes,
        success_rate: successes as f64 / total as f64,
        mean_execution_time: total_time / u32::try_from(total).unwrap_or(u32::MAX),
        min_execution_time: min_time,
        max_execution_time: max_time,
        total_retries,
        chaos_incidents,
        total_rows,
        incidents_by_fault,
        failures_by_class,
    })
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Queries: {}", self.total_tasks)?;
        writeln!(f, "Successful: {}", self.successes)?;
        writeln!(f, "Failed: {}", self.failures)?;
        writeln!(f, "Success Rate: {:.2}%", self.success_rate * 100.0)?;
        writeln!(
            f,
            "Average Execution Time: {:.2}s",
            self.mean_execution_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "Min Execution Time: {:.2}s",
            self.min_execution_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "Max Execution Time: {:.2}s",
            self.max_execution_time.as_secs_f64()
        )?;
        writeln!(f, "Total Retries: {}", self.total_retries)?;
        writeln!(f, "Total Rows Returned: {}", self.total_rows)?;
        write!(f, "Chaos Incidents: {}", self.chaos_incidents)?;
        for (kind, count) in &self.incidents_by_fault {
            write!(f, "\n  {kind}: {count}")?;
        }
        if !self.failures_by_class.is_empty() {
            write!(f, "\nFailures by Class:")?;
            for (class, count) in &self.failures_by_class {
                write!(f, "\n  {class}: {count}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn metrics(success: bool, attempts: u32, millis: u64, chaos: Option<FaultKind>) -> Metrics {
        Metrics {
            task_id: Uuid::new_v4(),
            prompt: "task".to_string(),
            sql_query: "SELECT 1".to_string(),
            success,
            attempts,
            execution_time: Duration::from_millis(millis),
            error_class: (!success).then_some(ErrorClass::Syntax),
            error_message: (!success).then(|| "syntax error: near SELEC".to_string()),
            rows_returned: usize::from(success) * 3,
            chaos,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_empty_run_is_an_error() {
        assert_eq!(summarize(&[]), Err(EmptyRunError));
    }

    #[test]
    fn test_seven_successes_three_exhausted() {
        let mut records: Vec<Metrics> = (0..7).map(|_| metrics(true, 1, 100, None)).collect();
        records.extend((0..3).map(|_| metrics(false, 3, 1_000, Some(FaultKind::KillConnection))));

        let summary = summarize(&records).unwrap();

        assert_eq!(summary.total_tasks, 10);
        assert_eq!(summary.successes, 7);
        assert_eq!(summary.failures, 3);
        assert!((summary.success_rate - 0.7).abs() < f64::EPSILON);
        assert_eq!(summary.total_retries, 6);
        assert_eq!(summary.chaos_incidents, 3);
        assert_eq!(summary.incidents_by_fault[&FaultKind::KillConnection], 3);
        assert_eq!(summary.failures_by_class[&ErrorClass::Syntax], 3);
        assert_eq!(summary.total_rows, 21);
        assert_eq!(summary.min_execution_time, Duration::from_millis(100));
        assert_eq!(summary.max_execution_time, Duration::from_millis(1_000));
        assert_eq!(summary.mean_execution_time, Duration::from_millis(370));
    }

    #[test]
    fn test_display_one_line_per_statistic() {
        let records = vec![
            metrics(true, 1, 500, None),
            metrics(false, 3, 1_500, Some(FaultKind::SlowQuery)),
        ];
        let text = summarize(&records).unwrap().to_string();

        assert!(text.contains("Total Queries: 2"));
        assert!(text.contains("Success Rate: 50.00%"));
        assert!(text.contains("Average Execution Time: 1.00s"));
        assert!(text.contains("Chaos Incidents: 1"));
        assert!(text.contains("  slow_query: 1"));
        assert!(text.contains("  syntax: 1"));
    }

    #[test]
    fn test_json_uses_snake_case_keys() {
        let summary = summarize(&[metrics(true, 2, 250, Some(FaultKind::CpuStress))]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(value["total_retries"], 1);
        assert_eq!(value["incidents_by_fault"]["cpu_stress"], 1);
        assert_eq!(value["mean_execution_time_secs"], 0.25);
    }
}
