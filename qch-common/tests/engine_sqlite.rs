//! End-to-end tests of the chaos and retry engine over a real SQLite
//! database loaded with the streaming-service fixture.

mod common;

use common::{fast_policy, fixture_db, init_test_logging};
use qch_common::chaos::{ChaosConfig, ChaosInjector, Fault, FaultKind};
use qch_common::generator::{CannedGenerator, DEFAULT_PROMPTS, QueryGenerator, SCHEMA_DESCRIPTION};
use qch_common::{Database, ErrorClass, MetricsLog, QueryTask, RetryController, summarize};
use std::time::Duration;
use tracing::info;

fn controller(chaos: ChaosConfig) -> RetryController {
    let injector = ChaosInjector::with_seed(chaos, 17).unwrap();
    RetryController::with_seed(injector, fast_policy(), 17).unwrap()
}

// ============================================================================
// Clean runs
// ============================================================================

#[tokio::test]
async fn test_builtin_workload_succeeds_without_chaos() {
    init_test_logging();
    info!("TEST START: test_builtin_workload_succeeds_without_chaos");

    let mut db = fixture_db();
    let mut controller = controller(ChaosConfig::disabled());
    let generator = CannedGenerator::builtin();
    let mut log = MetricsLog::new();

    for prompt in DEFAULT_PROMPTS {
        let sql = generator.generate(prompt, SCHEMA_DESCRIPTION).await.unwrap();
        let outcome = controller.execute_task(&mut db, &QueryTask::new(prompt, sql)).await;
        assert!(
            outcome.metrics.success,
            "{prompt}: {:?}",
            outcome.metrics.error_message
        );
        assert_eq!(outcome.metrics.attempts, 1);
        log.push(outcome.metrics).await;
    }

    let summary = summarize(log.records()).unwrap();
    assert_eq!(summary.total_tasks, DEFAULT_PROMPTS.len());
    assert_eq!(summary.success_rate, 1.0);
    assert_eq!(summary.total_retries, 0);
    assert_eq!(summary.chaos_incidents, 0);
    assert!(summary.total_rows > 0);

    info!("TEST PASS: test_builtin_workload_succeeds_without_chaos");
}

#[tokio::test]
async fn test_result_rows_returned_on_success() {
    init_test_logging();
    info!("TEST START: test_result_rows_returned_on_success");

    let mut db = fixture_db();
    let mut controller = controller(ChaosConfig::disabled());
    let task = QueryTask::from_sql("SELECT genre, COUNT(*) FROM movies GROUP BY genre");

    let outcome = controller.execute_with_retry(&mut db, &task, 3).await.unwrap();
    let rows = outcome.results.expect("rows on success");
    assert_eq!(rows.columns.len(), 2);
    assert_eq!(rows.len(), outcome.metrics.rows_returned);
    assert!(rows.len() <= 8);

    info!("TEST PASS: test_result_rows_returned_on_success");
}

// ============================================================================
// Failures and recovery
// ============================================================================

#[tokio::test]
async fn test_syntax_error_exhausts_and_leaves_session_clean() {
    init_test_logging();
    info!("TEST START: test_syntax_error_exhausts_and_leaves_session_clean");

    let mut db = fixture_db();
    let mut controller = controller(ChaosConfig::disabled());

    let broken = controller
        .execute_task(&mut db, &QueryTask::from_sql("SELEC * FROM users"))
        .await;
    assert!(!broken.metrics.success);
    assert_eq!(broken.metrics.attempts, 3);
    assert_eq!(broken.metrics.error_class, Some(ErrorClass::Syntax));
    assert!(broken.results.is_none());

    let follow_up = controller
        .execute_task(&mut db, &QueryTask::from_sql("SELECT COUNT(*) FROM users"))
        .await;
    assert!(follow_up.metrics.success);
    assert_eq!(follow_up.metrics.attempts, 1);

    info!("TEST PASS: test_syntax_error_exhausts_and_leaves_session_clean");
}

#[tokio::test]
async fn test_killed_connection_is_recovered_for_next_task() {
    init_test_logging();
    info!("TEST START: test_killed_connection_is_recovered_for_next_task");

    let mut db = fixture_db();
    let mut killer = controller(ChaosConfig::only(vec![Fault::KillConnection], 1.0));

    let outcome = killer
        .execute_task(&mut db, &QueryTask::from_sql("SELECT COUNT(*) FROM movies"))
        .await;
    assert!(!outcome.metrics.success);
    assert_eq!(outcome.metrics.chaos, Some(FaultKind::KillConnection));
    assert_eq!(outcome.metrics.error_class, Some(ErrorClass::ConnectionLost));
    assert_eq!(killer.chaos().injected_counts()[&FaultKind::KillConnection], 3);

    let mut calm = controller(ChaosConfig::disabled());
    let outcome = calm
        .execute_task(&mut db, &QueryTask::from_sql("SELECT COUNT(*) FROM movies"))
        .await;
    assert!(outcome.metrics.success);
    assert!(db.is_connected());

    info!("TEST PASS: test_killed_connection_is_recovered_for_next_task");
}

#[tokio::test]
async fn test_forced_slow_query_marks_every_record() {
    init_test_logging();
    info!("TEST START: test_forced_slow_query_marks_every_record");

    let mut db = fixture_db();
    let slow = Fault::SlowQuery {
        duration: Duration::from_millis(5),
    };
    let mut controller = controller(ChaosConfig::only(vec![slow], 1.0));

    for sql in ["SELECT COUNT(*) FROM users", "SELECT title FROM movies LIMIT 3"] {
        let outcome = controller.execute_task(&mut db, &QueryTask::from_sql(sql)).await;
        assert!(outcome.metrics.success);
        assert_eq!(outcome.metrics.chaos, Some(FaultKind::SlowQuery));
        assert!(outcome.metrics.execution_time >= Duration::from_millis(5));
    }

    info!("TEST PASS: test_forced_slow_query_marks_every_record");
}

#[tokio::test]
async fn test_temp_table_stress_does_not_break_queries() {
    init_test_logging();
    info!("TEST START: test_temp_table_stress_does_not_break_queries");

    let mut db = fixture_db();
    let stress = Fault::TempTableStress { rows: 500 };
    let mut controller = controller(ChaosConfig::only(vec![stress], 1.0));

    let outcome = controller
        .execute_task(&mut db, &QueryTask::from_sql("SELECT COUNT(*) FROM viewing_history"))
        .await;
    assert!(outcome.metrics.success);
    assert_eq!(outcome.metrics.chaos, Some(FaultKind::TempTableStress));

    info!("TEST PASS: test_temp_table_stress_does_not_break_queries");
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_metrics_jsonl_reloads_to_same_summary() {
    init_test_logging();
    info!("TEST START: test_metrics_jsonl_reloads_to_same_summary");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.jsonl");
    let mut db = fixture_db();
    let mut controller = controller(ChaosConfig::disabled());
    let mut log = MetricsLog::new().with_persistence(path.clone());

    for sql in ["SELECT 1", "SELEC 2", "SELECT name FROM users LIMIT 4"] {
        let outcome = controller.execute_task(&mut db, &QueryTask::from_sql(sql)).await;
        log.push(outcome.metrics).await;
    }

    let reloaded = MetricsLog::load_jsonl(&path).unwrap();
    assert_eq!(reloaded.len(), 3);
    let live = summarize(log.records()).unwrap();
    let from_disk = summarize(&reloaded).unwrap();
    assert_eq!(live.total_tasks, from_disk.total_tasks);
    assert_eq!(live.successes, from_disk.successes);
    assert_eq!(live.total_rows, from_disk.total_rows);
    assert_eq!(live.failures_by_class, from_disk.failures_by_class);
    assert_eq!(from_disk.failures, 1);
    assert_eq!(from_disk.total_retries, 2);

    info!("TEST PASS: test_metrics_jsonl_reloads_to_same_summary");
}

#[test]
fn test_rollback_without_transaction_is_noop() {
    let mut db = fixture_db();
    db.rollback().unwrap();
    db.query("SELECT 1").unwrap();
    db.rollback().unwrap();
    db.rollback().unwrap();
}
