//! Scripted in-memory database for tests and dry runs.
//!
//! Responses are consumed in order, one per `query` call. When the script
//! runs out the fallback response is replayed.

use crate::db::{Database, DbError, ResultSet};
use std::collections::VecDeque;
use std::time::Duration;

/// One scripted reply to a `query` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    Rows(ResultSet),
    Fail(DbError),
}

impl MockResponse {
    /// A single-column result with `count` rows.
    pub fn rows(count: usize) -> Self {
        let rows = (0..count)
            .map(|i| vec![serde_json::Value::from(i as i64)])
            .collect();
        Self::Rows(ResultSet::new(vec!["id".to_string()], rows))
    }

    pub fn fail(err: DbError) -> Self {
        Self::Fail(err)
    }
}

/// Calls observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Query(String),
    ExecuteBatch(String),
    Commit,
    Rollback,
    InduceSleep(Duration),
    SetStatementTimeout(Duration),
    TerminateBackend,
}

#[derive(Debug, Clone)]
pub struct MockDatabase {
    script: VecDeque<MockResponse>,
    fallback: MockResponse,
    calls: Vec<MockCall>,
    in_transaction: bool,
    fail_fault_hooks: bool,
}

impl MockDatabase {
    /// Every query succeeds with `rows` rows.
    pub fn succeeding(rows: usize) -> Self {
        Self::scripted(Vec::new(), MockResponse::rows(rows))
    }

    /// Every query fails with `err`.
    pub fn failing(err: DbError) -> Self {
        Self::scripted(Vec::new(), MockResponse::Fail(err))
    }

    /// The first `failures` queries fail with `err`, later ones return `rows` rows.
    pub fn fail_then_succeed(failures: usize, err: DbError, rows: usize) -> Self {
        let script = std::iter::repeat_n(MockResponse::Fail(err), failures).collect();
        Self::scripted(script, MockResponse::rows(rows))
    }

    pub fn scripted(script: Vec<MockResponse>, fallback: MockResponse) -> Self {
        Self {
            script: script.into(),
            fallback,
            calls: Vec::new(),
            in_transaction: false,
            fail_fault_hooks: false,
        }
    }

    /// Make every fault hook return an error, as a killed session would.
    pub fn with_failing_fault_hooks(mut self) -> Self {
        self.fail_fault_hooks = true;
        self
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn query_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, MockCall::Query(_)))
            .count()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn fault_hook(&mut self, call: MockCall) -> Result<(), DbError> {
        self.calls.push(call);
        if self.fail_fault_hooks {
            Err(DbError::ConnectionLost("mock session terminated".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Database for MockDatabase {
    fn query(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        self.calls.push(MockCall::Query(sql.to_string()));
        self.in_transaction = true;
        match self.script.pop_front().unwrap_or_else(|| self.fallback.clone()) {
            MockResponse::Rows(rows) => Ok(rows),
            MockResponse::Fail(err) => Err(err),
        }
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        self.fault_hook(MockCall::ExecuteBatch(sql.to_string()))
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.calls.push(MockCall::Commit);
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.calls.push(MockCall::Rollback);
        self.in_transaction = false;
        Ok(())
    }

    fn induce_sleep(&mut self, duration: Duration) -> Result<(), DbError> {
        self.fault_hook(MockCall::InduceSleep(duration))
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), DbError> {
        self.fault_hook(MockCall::SetStatementTimeout(timeout))
    }

    fn terminate_backend(&mut self) -> Result<(), DbError> {
        self.fault_hook(MockCall::TerminateBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_then_succeed_script() {
        let mut db = MockDatabase::fail_then_succeed(2, DbError::Busy("locked".into()), 4);
        assert!(db.query("SELECT 1").is_err());
        assert!(db.query("SELECT 1").is_err());
        assert_eq!(db.query("SELECT 1").unwrap().len(), 4);
        assert_eq!(db.query("SELECT 1").unwrap().len(), 4);
        assert_eq!(db.query_count(), 4);
    }

    #[test]
    fn test_transaction_tracking() {
        let mut db = MockDatabase::succeeding(1);
        db.query("SELECT 1").unwrap();
        assert!(db.in_transaction());
        db.rollback().unwrap();
        assert!(!db.in_transaction());
        assert_eq!(
            db.calls(),
            &[MockCall::Query("SELECT 1".to_string()), MockCall::Rollback]
        );
    }

    #[test]
    fn test_failing_fault_hooks() {
        let mut db = MockDatabase::succeeding(1).with_failing_fault_hooks();
        assert!(db.terminate_backend().is_err());
        assert!(db.induce_sleep(Duration::from_millis(1)).is_err());
        assert_eq!(db.calls().len(), 2);
    }
}
