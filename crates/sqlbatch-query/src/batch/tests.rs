//! Tests for batch execution

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlbatch_core::{
    ColumnMeta, Connection, Dialect, ProvisionalResult, QueryCancelHandle, Result, Row,
    SqlbatchError, Value,
};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::{BatchError, SplitError};

/// What the scripted connection does for the next `execute`
enum Step {
    Results(Vec<ProvisionalResult>),
    Fail(SqlbatchError),
    /// Never completes; only cancellation or a deadline ends it
    Hang,
}

fn affected(n: u64) -> Step {
    Step::Results(vec![ProvisionalResult::affected(n)])
}

fn statement_error(message: &str) -> Step {
    Step::Fail(SqlbatchError::statement(message, Some("42000".into())))
}

#[derive(Default)]
struct CountingCancel {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryCancelHandle for CountingCancel {
    async fn cancel(&self) {
        // Delivery takes a round trip; only a completed cancel is counted
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory connection replaying scripted outcomes in order
struct ScriptedConnection {
    dialect: Dialect,
    steps: Mutex<VecDeque<Step>>,
    executed: Mutex<Vec<String>>,
    fail_begin: bool,
    fail_commit: bool,
    closed: AtomicBool,
    cancel: Arc<CountingCancel>,
    settled: AtomicUsize,
    settled_before_rollback: AtomicBool,
}

impl ScriptedConnection {
    fn new(dialect: Dialect, steps: Vec<Step>) -> Self {
        Self {
            dialect,
            steps: Mutex::new(steps.into()),
            executed: Mutex::new(Vec::new()),
            fail_begin: false,
            fail_commit: false,
            closed: AtomicBool::new(false),
            cancel: Arc::new(CountingCancel::default()),
            settled: AtomicUsize::new(0),
            settled_before_rollback: AtomicBool::new(false),
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn cancel_calls(&self) -> usize {
        self.cancel.calls.load(Ordering::SeqCst)
    }

    fn settle_calls(&self) -> usize {
        self.settled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn driver_name(&self) -> &str {
        "scripted"
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, sql: &str) -> Result<Vec<ProvisionalResult>> {
        self.executed.lock().unwrap().push(sql.to_string());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| affected(0));
        match step {
            Step::Results(results) => Ok(results),
            Step::Fail(err) => {
                if err.is_connection_fatal() {
                    self.closed.store(true, Ordering::SeqCst);
                }
                Err(err)
            }
            Step::Hang => std::future::pending().await,
        }
    }

    async fn begin(&self) -> Result<()> {
        self.executed.lock().unwrap().push("BEGIN".into());
        if self.fail_begin {
            return Err(SqlbatchError::Connection("begin refused".into()));
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.executed.lock().unwrap().push("COMMIT".into());
        if self.fail_commit {
            return Err(SqlbatchError::statement("serialization failure", Some("40001".into())));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.executed.lock().unwrap().push("ROLLBACK".into());
        let settled = self.cancel_calls() > 0 && self.settle_calls() > 0;
        self.settled_before_rollback.store(settled, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        let handle: Arc<dyn QueryCancelHandle> = self.cancel.clone();
        Some(handle)
    }

    async fn settle_after_cancel(&self) -> Result<()> {
        assert!(self.cancel_calls() > 0, "settled before the cancel was delivered");
        self.settled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn shared(conn: ScriptedConnection) -> (Arc<ScriptedConnection>, Arc<dyn Connection>) {
    let conn = Arc::new(conn);
    let dyn_conn: Arc<dyn Connection> = conn.clone();
    (conn, dyn_conn)
}

mod batch_options_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_batch_options_default() {
        let options = BatchOptions::default();

        assert_eq!(options.on_error, ErrorPolicy::Continue);
        assert!(!options.transaction);
        assert_eq!(options.statement_timeout(), None);
        assert_eq!(options.batch_timeout(), None);
    }

    #[test]
    fn test_batch_options_builder() {
        let options = BatchOptions::new()
            .with_on_error(ErrorPolicy::Abort)
            .with_transaction(true)
            .with_statement_timeout_ms(5000)
            .with_batch_timeout_ms(60_000);

        assert_eq!(options.on_error, ErrorPolicy::Abort);
        assert!(options.transaction);
        assert_eq!(options.statement_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(options.batch_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_batch_options_from_toml() {
        let options = BatchOptions::from_toml_str(
            r#"
            [connection]
            engine = "postgres"

            [batch]
            on_error = "abort"
            statement_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(options.on_error, ErrorPolicy::Abort);
        assert_eq!(options.statement_timeout_ms, 250);
        assert!(!options.transaction);
    }

    #[test]
    fn test_batch_options_missing_table_is_default() {
        let options = BatchOptions::from_toml_str("").unwrap();
        assert_eq!(options, BatchOptions::default());
    }

    #[test]
    fn test_batch_options_rejects_unknown_policy() {
        assert!(BatchOptions::from_toml_str("[batch]\non_error = \"retry\"").is_err());
    }
}

mod sql_preview_tests {
    use crate::batch::executor::sql_preview;

    #[test]
    fn test_short_sql_untouched() {
        assert_eq!(sql_preview("  SELECT 1; "), "SELECT 1;");
    }

    #[test]
    fn test_long_sql_truncated_on_char_boundary() {
        let sql = "é".repeat(150);
        let preview = sql_preview(&sql);
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));
    }
}

mod execution_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_records_follow_source_order() {
        let sql = "INSERT INTO tbl VALUES(1); DELETE FROM tbl WHERE id = 1;";
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::MySql,
            vec![affected(1), affected(1)],
        ));

        let outcome = BatchExecutor::with_defaults().run(sql, None, &dyn_conn).await;

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert!(outcome.error.is_none());
        let statements: Vec<&str> = outcome.records.iter().map(|r| r.statement.as_str()).collect();
        assert_eq!(
            statements,
            vec!["INSERT INTO tbl VALUES(1);", " DELETE FROM tbl WHERE id = 1;"]
        );
        for record in &outcome.records {
            assert_eq!(record.column_names, vec!["Affected Rows"]);
            assert_eq!(record.rows, vec![Row::new(vec![Value::Int64(1)])]);
        }
        assert_eq!(conn.executed().len(), 2);
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.total_affected_rows(), 2);
    }

    #[tokio::test]
    async fn test_continue_policy_runs_remaining_statements() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![affected(1), statement_error("syntax error"), affected(3)],
        ));

        let outcome = BatchExecutor::with_defaults()
            .run("INSERT 1; BROKEN; INSERT 3;", None, &dyn_conn)
            .await;

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.records[1].error.as_deref(), Some("syntax error"));
        assert_eq!(outcome.records[2].rows_affected, 3);
        assert_eq!(outcome.failure_count, 1);
        assert_eq!(conn.executed().len(), 3);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_after_failure() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![affected(1), statement_error("syntax error"), affected(3)],
        ));

        let outcome = BatchExecutor::new(BatchOptions::new().with_on_error(ErrorPolicy::Abort))
            .run("INSERT 1; BROKEN; INSERT 3;", None, &dyn_conn)
            .await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.error.as_ref().and_then(|e| e.statement_index()), Some(1));
        assert!(matches!(outcome.error, Some(BatchError::StatementFailed { .. })));
        assert_eq!(conn.executed(), vec!["INSERT 1;", " BROKEN;"]);
    }

    #[tokio::test]
    async fn test_connection_fatal_aborts_regardless_of_policy() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::MySql,
            vec![
                affected(1),
                Step::Fail(SqlbatchError::Connection("server has gone away".into())),
                affected(1),
            ],
        ));

        let outcome = BatchExecutor::with_defaults()
            .run("INSERT 1; INSERT 2; INSERT 3;", None, &dyn_conn)
            .await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records[1].error.as_deref().unwrap().contains("server has gone away"));
        assert!(matches!(
            outcome.error,
            Some(BatchError::ConnectionFatal { index: 1, .. })
        ));
        assert_eq!(conn.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_row_results_and_multiple_result_sets() {
        let columns = vec![ColumnMeta::new("id", "INT", 0)];
        let (_conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::MySql,
            vec![Step::Results(vec![
                ProvisionalResult::rows(columns.clone(), vec![Row::new(vec![Value::Int64(1)])]),
                ProvisionalResult::rows(columns, vec![Row::new(vec![Value::Int64(2)])]),
            ])],
        ));

        let outcome = BatchExecutor::with_defaults()
            .run("CALL two_sets();", None, &dyn_conn)
            .await;

        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|r| r.statement == "CALL two_sets();"));
        assert_eq!(outcome.records[1].rows[0].values, vec![Value::Int64(2)]);
        assert_eq!(outcome.success_count, 1);
    }

    #[tokio::test]
    async fn test_explicit_dialect_overrides_connection() {
        let sql = "DELIMITER //\nSELECT 1//\nDELIMITER ;\nSELECT 2;";
        let (conn, dyn_conn) = shared(ScriptedConnection::new(Dialect::PostgreSql, vec![]));

        BatchExecutor::with_defaults()
            .run(sql, Some(Dialect::MySql), &dyn_conn)
            .await;

        assert_eq!(conn.executed(), vec!["SELECT 1", "SELECT 2;"]);
    }

    #[tokio::test]
    async fn test_split_error_attempts_nothing() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(Dialect::MySql, vec![]));

        let outcome = BatchExecutor::with_defaults()
            .run("SELECT 1;\nDELIMITER\nSELECT 2;", None, &dyn_conn)
            .await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert!(outcome.records.is_empty());
        assert_eq!(
            outcome.error,
            Some(BatchError::Split(SplitError::InvalidDelimiter { line: 2 }))
        );
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_bytes_rejected() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(Dialect::MySql, vec![]));

        let outcome = BatchExecutor::with_defaults()
            .run_bytes(b"SELECT \xff;", None, &dyn_conn, CancellationToken::new())
            .await;

        assert_eq!(
            outcome.error,
            Some(BatchError::Split(SplitError::InvalidUtf8 { valid_up_to: 7 }))
        );
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_script_completes() {
        let (_conn, dyn_conn) = shared(ScriptedConnection::new(Dialect::PostgreSql, vec![]));

        let outcome = BatchExecutor::with_defaults()
            .run("  -- nothing\n", None, &dyn_conn)
            .await;

        assert!(outcome.is_completed());
        assert!(outcome.records.is_empty());
    }
}

mod transaction_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transactional() -> BatchExecutor {
        BatchExecutor::new(BatchOptions::new().with_transaction(true))
    }

    #[tokio::test]
    async fn test_commit_when_all_succeed() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![affected(1), affected(1)],
        ));

        let outcome = transactional().run("INSERT 1; INSERT 2;", None, &dyn_conn).await;

        assert!(outcome.is_completed());
        assert!(outcome.was_transactional);
        assert!(!outcome.transaction_rolled_back);
        assert_eq!(conn.executed(), vec!["BEGIN", "INSERT 1;", " INSERT 2;", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_rollback_after_statement_error() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![affected(1), statement_error("duplicate key")],
        ));

        let outcome = transactional().run("INSERT 1; INSERT 1;", None, &dyn_conn).await;

        assert!(outcome.is_completed());
        assert!(outcome.transaction_rolled_back);
        assert_eq!(conn.executed().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[tokio::test]
    async fn test_failed_begin_aborts_before_statements() {
        let mut conn = ScriptedConnection::new(Dialect::PostgreSql, vec![affected(1)]);
        conn.fail_begin = true;
        let (conn, dyn_conn) = shared(conn);

        let outcome = transactional().run("INSERT 1;", None, &dyn_conn).await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert!(outcome.records.is_empty());
        assert!(matches!(outcome.error, Some(BatchError::Transaction { .. })));
        assert_eq!(conn.executed(), vec!["BEGIN"]);
    }

    #[tokio::test]
    async fn test_failed_commit_aborts_batch() {
        let mut conn = ScriptedConnection::new(Dialect::PostgreSql, vec![affected(1)]);
        conn.fail_commit = true;
        let (_conn, dyn_conn) = shared(conn);

        let outcome = transactional().run("INSERT 1;", None, &dyn_conn).await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert_eq!(outcome.records.len(), 1);
        assert!(matches!(outcome.error, Some(BatchError::Transaction { .. })));
    }

    #[tokio::test]
    async fn test_closed_connection_skips_rollback() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![Step::Fail(SqlbatchError::Connection("terminated".into()))],
        ));

        let outcome = transactional().run("INSERT 1; INSERT 2;", None, &dyn_conn).await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert!(outcome.transaction_rolled_back);
        assert_eq!(conn.executed(), vec!["BEGIN", "INSERT 1;"]);
    }
}

mod cancellation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_statement_timeout_cancels_and_aborts() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![affected(1), Step::Hang, affected(1)],
        ));

        let outcome = BatchExecutor::new(BatchOptions::new().with_statement_timeout_ms(20))
            .run("INSERT 1; SELECT pg_sleep(60); INSERT 3;", None, &dyn_conn)
            .await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records[1].error.as_deref().unwrap().starts_with("Timeout"));
        assert!(matches!(
            outcome.error,
            Some(BatchError::ConnectionFatal { index: 1, .. })
        ));
        assert_eq!(conn.cancel_calls(), 1);
        assert_eq!(conn.settle_calls(), 1);
        assert_eq!(conn.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_reusable_after_timeout() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::MySql,
            vec![Step::Hang, affected(1)],
        ));

        let first = BatchExecutor::new(BatchOptions::new().with_statement_timeout_ms(20))
            .run("SELECT SLEEP(60);", None, &dyn_conn)
            .await;
        assert_eq!(first.status, BatchStatus::Aborted);
        // Cancel and cleanup are complete before the outcome is returned
        assert_eq!(conn.cancel_calls(), 1);
        assert_eq!(conn.settle_calls(), 1);

        let second = BatchExecutor::with_defaults()
            .run("INSERT 1;", None, &dyn_conn)
            .await;
        assert_eq!(second.status, BatchStatus::Completed);
        assert_eq!(second.records[0].rows_affected, 1);
        assert_eq!(conn.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_rollback_waits_for_cancel() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![affected(1), Step::Hang],
        ));

        let outcome = BatchExecutor::new(
            BatchOptions::new()
                .with_transaction(true)
                .with_statement_timeout_ms(20),
        )
        .run("INSERT 1; SELECT pg_sleep(60);", None, &dyn_conn)
        .await;

        assert!(outcome.transaction_rolled_back);
        assert_eq!(
            conn.executed(),
            vec!["BEGIN", "INSERT 1;", "SELECT pg_sleep(60);", "ROLLBACK"]
        );
        assert!(conn.settled_before_rollback.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_batch_timeout_applies_across_statements() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::PostgreSql,
            vec![Step::Hang],
        ));

        let outcome = BatchExecutor::new(BatchOptions::new().with_batch_timeout_ms(20))
            .run("SELECT pg_sleep(60);", None, &dyn_conn)
            .await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert_eq!(conn.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_token_cancels_in_flight_statement() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(
            Dialect::MySql,
            vec![affected(1), Step::Hang],
        ));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = BatchExecutor::with_defaults()
            .run_with_cancel("INSERT 1; SELECT SLEEP(60); INSERT 3;", None, &dyn_conn, token)
            .await;

        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].error, None);
        assert_eq!(outcome.records[1].error.as_deref(), Some("Cancelled"));
        assert_eq!(conn.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_runs_nothing() {
        let (conn, dyn_conn) = shared(ScriptedConnection::new(Dialect::MySql, vec![]));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = BatchExecutor::with_defaults()
            .run_with_cancel("INSERT 1; INSERT 2;", None, &dyn_conn, token)
            .await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.status, BatchStatus::Aborted);
        assert!(conn.executed().is_empty());
    }
}
