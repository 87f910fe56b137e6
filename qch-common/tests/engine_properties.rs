//! Property tests for the retry bounds and the run analyzer.

mod common;

use chrono::Utc;
use proptest::prelude::*;
use qch_common::chaos::{ChaosConfig, ChaosInjector};
use qch_common::db::{DbError, ErrorClass, MockDatabase};
use qch_common::{
    DurationRange, FaultKind, Metrics, QueryTask, RetryController, RetryPolicy, summarize,
};
use std::time::Duration;
use uuid::Uuid;

fn metrics_strategy() -> impl Strategy<Value = Metrics> {
    (
        any::<bool>(),
        1u32..=5,
        0u64..20_000,
        0usize..500,
        proptest::option::of(0usize..FaultKind::ALL.len()),
    )
        .prop_map(|(success, attempts, millis, rows, chaos)| Metrics {
            task_id: Uuid::new_v4(),
            prompt: "task".to_string(),
            sql_query: "SELECT 1".to_string(),
            success,
            attempts,
            execution_time: Duration::from_millis(millis),
            error_class: (!success).then_some(ErrorClass::Busy),
            error_message: None,
            rows_returned: if success { rows } else { 0 },
            chaos: chaos.map(|i| FaultKind::ALL[i]),
            timestamp: Utc::now(),
        })
}

proptest! {
    #[test]
    fn summary_is_order_independent(
        (records, shuffled) in prop::collection::vec(metrics_strategy(), 1..40)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let a = summarize(&records).unwrap();
        let b = summarize(&shuffled).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn summary_counts_are_consistent(records in prop::collection::vec(metrics_strategy(), 1..40)) {
        let summary = summarize(&records).unwrap();
        prop_assert_eq!(summary.successes + summary.failures, summary.total_tasks);
        prop_assert!((0.0..=1.0).contains(&summary.success_rate));
        prop_assert!(summary.min_execution_time <= summary.mean_execution_time);
        prop_assert!(summary.mean_execution_time <= summary.max_execution_time);
        prop_assert_eq!(
            summary.incidents_by_fault.values().sum::<usize>(),
            summary.chaos_incidents
        );
    }

    #[test]
    fn attempts_stay_within_budget(failures in 0usize..8, max_attempts in 1u32..6) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let metrics = runtime.block_on(async {
            let chaos = ChaosInjector::with_seed(ChaosConfig::disabled(), 1).unwrap();
            let backoff = DurationRange::from_millis(10, 20);
            let policy = RetryPolicy::new(max_attempts, backoff).unwrap();
            let mut controller = RetryController::with_seed(chaos, policy, 1).unwrap();
            let busy = DbError::Busy("locked".into());
            let mut db = MockDatabase::fail_then_succeed(failures, busy, 2);
            controller
                .execute_with_retry(&mut db, &QueryTask::from_sql("SELECT 1"), max_attempts)
                .await
                .unwrap()
                .metrics
        });

        prop_assert!(metrics.attempts >= 1 && metrics.attempts <= max_attempts);
        prop_assert_eq!(metrics.attempts, metrics.retry_count() + 1);
        prop_assert_eq!(metrics.success, failures < max_attempts as usize);
        if metrics.success {
            prop_assert_eq!(metrics.error_class, None);
            prop_assert_eq!(metrics.rows_returned, 2);
            prop_assert_eq!(metrics.attempts as usize, failures + 1);
        } else {
            prop_assert_eq!(metrics.attempts, max_attempts);
            prop_assert_eq!(metrics.error_class, Some(ErrorClass::Busy));
            prop_assert_eq!(metrics.rows_returned, 0);
        }
    }
}

#[test]
fn empty_run_is_rejected() {
    common::init_test_logging();
    assert!(summarize(&[]).is_err());
}
