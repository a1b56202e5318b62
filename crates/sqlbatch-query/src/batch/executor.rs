//! Batch executor implementation
//!
//! Runs the statements of one script strictly in source order on a single
//! borrowed connection, applying the error policy, deadlines and the optional
//! whole-batch transaction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlbatch_core::{Connection, Dialect, ProvisionalResult, Result, SqlbatchError};
use tokio_util::sync::CancellationToken;

use crate::error::{BatchError, SplitError};
use crate::normalizer::{ResultRecord, normalize};
use crate::splitter::{self, StatementSpan};

/// Maximum number of characters of SQL included in log events
const SQL_PREVIEW_CHARS: usize = 100;

/// Upper bound on cancelling an abandoned statement and settling the session
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// What to do after a statement-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Record the error and run the next statement
    Continue,
    /// Record the error and stop the batch
    Abort,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::Continue
    }
}

/// Configuration options for batch execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Behavior after a statement-level error
    pub on_error: ErrorPolicy,
    /// Whether to execute all statements within a single transaction
    pub transaction: bool,
    /// Timeout per statement in milliseconds (0 = no timeout)
    pub statement_timeout_ms: u64,
    /// Timeout for the whole batch in milliseconds (0 = no timeout)
    pub batch_timeout_ms: u64,
}

#[derive(Deserialize)]
struct BatchConfigFile {
    #[serde(default)]
    batch: BatchOptions,
}

impl BatchOptions {
    /// Create new batch options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from the `[batch]` table of a TOML document.
    ///
    /// Other tables are ignored; a missing `[batch]` table yields defaults.
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, toml::de::Error> {
        let file: BatchConfigFile = toml::from_str(source)?;
        Ok(file.batch)
    }

    /// Set the error policy
    pub fn with_on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Enable transaction wrapping
    pub fn with_transaction(mut self, transaction: bool) -> Self {
        self.transaction = transaction;
        self
    }

    /// Set statement timeout in milliseconds
    pub fn with_statement_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.statement_timeout_ms = timeout_ms;
        self
    }

    /// Set batch timeout in milliseconds
    pub fn with_batch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.batch_timeout_ms = timeout_ms;
        self
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0).then(|| Duration::from_millis(self.statement_timeout_ms))
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.batch_timeout_ms > 0).then(|| Duration::from_millis(self.batch_timeout_ms))
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            on_error: ErrorPolicy::Continue,
            transaction: false,
            statement_timeout_ms: 0,
            batch_timeout_ms: 0,
        }
    }
}

/// Progress of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Splitting,
    /// Running the statement at this 0-based index
    Executing(usize),
    Aborted,
    Completed,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Completed)
    }
}

/// Terminal status of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Every statement was attempted
    Completed,
    /// The run was cut short; see [`BatchOutcome::error`]
    Aborted,
}

/// Records of one batch plus how the run ended
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One record per attempted statement result set, in source order
    pub records: Vec<ResultRecord>,
    pub status: BatchStatus,
    /// Error that ended the batch early (`None` when completed)
    pub error: Option<BatchError>,
    /// Number of statements that succeeded
    pub success_count: usize,
    /// Number of statements that failed
    pub failure_count: usize,
    /// Total execution time for the entire batch
    pub total_execution_time: Duration,
    /// Whether the batch was executed in a transaction
    pub was_transactional: bool,
    /// Whether the transaction was rolled back (if transactional)
    pub transaction_rolled_back: bool,
}

impl BatchOutcome {
    fn aborted_before_start(error: BatchError, total_time: Duration, transactional: bool) -> Self {
        Self {
            records: Vec::new(),
            status: BatchStatus::Aborted,
            error: Some(error),
            success_count: 0,
            failure_count: 0,
            total_execution_time: total_time,
            was_transactional: transactional,
            transaction_rolled_back: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    /// Check if any statement failed
    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    /// Get the total number of rows affected across all records
    pub fn total_affected_rows(&self) -> i64 {
        self.records
            .iter()
            .filter(|r| !r.is_error())
            .map(|r| r.rows_affected)
            .fold(0i64, i64::saturating_add)
    }

    /// Get all failed records
    pub fn failed_records(&self) -> Vec<&ResultRecord> {
        self.records.iter().filter(|r| r.is_error()).collect()
    }
}

/// Batch executor for running a script on one connection
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    options: BatchOptions,
}

impl BatchExecutor {
    /// Create a new batch executor with the given options
    pub fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    /// Create a batch executor with default options
    pub fn with_defaults() -> Self {
        Self::new(BatchOptions::default())
    }

    /// Split and execute a script.
    ///
    /// # Arguments
    /// * `text` - Raw script
    /// * `dialect` - Splitting rules; `None` uses the connection's dialect
    /// * `connection` - Borrowed connection, left open afterwards
    pub async fn run(
        &self,
        text: &str,
        dialect: Option<Dialect>,
        connection: &Arc<dyn Connection>,
    ) -> BatchOutcome {
        self.run_with_cancel(text, dialect, connection, CancellationToken::new())
            .await
    }

    /// Like [`BatchExecutor::run`], stopping the in-flight statement when
    /// `cancel` fires.
    #[tracing::instrument(
        skip_all,
        fields(driver = connection.driver_name(), transaction = self.options.transaction)
    )]
    pub async fn run_with_cancel(
        &self,
        text: &str,
        dialect: Option<Dialect>,
        connection: &Arc<dyn Connection>,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let batch_start = Instant::now();
        let dialect = dialect.unwrap_or_else(|| connection.dialect());
        let mut state = BatchState::Pending;
        advance(&mut state, BatchState::Splitting);

        match splitter::split(text, dialect) {
            Ok(spans) => {
                self.execute_spans(&spans, connection, cancel, batch_start, state)
                    .await
            }
            Err(err) => {
                tracing::error!(error = %err, "script could not be split");
                advance(&mut state, BatchState::Aborted);
                BatchOutcome::aborted_before_start(
                    err.into(),
                    batch_start.elapsed(),
                    self.options.transaction,
                )
            }
        }
    }

    /// Execute a script given as raw bytes; non-UTF-8 input aborts the batch.
    pub async fn run_bytes(
        &self,
        bytes: &[u8],
        dialect: Option<Dialect>,
        connection: &Arc<dyn Connection>,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.run_with_cancel(text, dialect, connection, cancel).await,
            Err(err) => {
                let err = SplitError::InvalidUtf8 {
                    valid_up_to: err.valid_up_to(),
                };
                tracing::error!(error = %err, "script could not be split");
                BatchOutcome::aborted_before_start(
                    err.into(),
                    Duration::ZERO,
                    self.options.transaction,
                )
            }
        }
    }

    /// Execute already split statements in order
    async fn execute_spans(
        &self,
        spans: &[StatementSpan],
        connection: &Arc<dyn Connection>,
        cancel: CancellationToken,
        batch_start: Instant,
        mut state: BatchState,
    ) -> BatchOutcome {
        let batch_deadline = self
            .options
            .batch_timeout()
            .map(|timeout| tokio::time::Instant::from_std(batch_start) + timeout);
        let transactional = self.options.transaction;

        if transactional {
            if let Err(err) = connection.begin().await {
                tracing::error!(error = %err, "failed to open batch transaction");
                advance(&mut state, BatchState::Aborted);
                return BatchOutcome::aborted_before_start(
                    BatchError::Transaction {
                        message: err.to_string(),
                    },
                    batch_start.elapsed(),
                    true,
                );
            }
        }

        let mut records = Vec::with_capacity(spans.len());
        let mut success_count = 0;
        let mut failure_count = 0;
        let mut batch_error = None;
        let mut connection_lost = false;

        for (index, span) in spans.iter().enumerate() {
            advance(&mut state, BatchState::Executing(index));
            let sql = span.executable_sql();
            tracing::debug!(index, sql_preview = %sql_preview(sql), "executing statement");

            let start = Instant::now();
            let result = self
                .execute_statement(connection, sql, batch_deadline, &cancel)
                .await;
            let elapsed = start.elapsed();

            match result {
                Ok(results) => {
                    success_count += 1;
                    if results.is_empty() {
                        records.push(normalize(ProvisionalResult::affected(0), &span.text, elapsed));
                    }
                    records.extend(
                        results
                            .into_iter()
                            .map(|provisional| normalize(provisional, &span.text, elapsed)),
                    );
                }
                Err(err) if err.is_connection_fatal() => {
                    tracing::error!(index, error = %err, "aborting batch");
                    failure_count += 1;
                    records.push(ResultRecord::failed(&span.text, elapsed, err.to_string()));
                    batch_error = Some(BatchError::ConnectionFatal {
                        index,
                        message: err.to_string(),
                    });
                    connection_lost = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(index, code = ?err.code(), error = %err, "statement failed");
                    failure_count += 1;
                    records.push(ResultRecord::failed(&span.text, elapsed, err.to_string()));
                    if self.options.on_error == ErrorPolicy::Abort {
                        batch_error = Some(BatchError::StatementFailed {
                            index,
                            message: err.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        let mut rolled_back = false;
        if transactional {
            if failure_count == 0 {
                if let Err(err) = connection.commit().await {
                    tracing::error!(error = %err, "failed to commit batch transaction");
                    batch_error = Some(BatchError::Transaction {
                        message: err.to_string(),
                    });
                }
            } else if connection_lost && connection.is_closed() {
                tracing::debug!("connection closed, skipping rollback");
                rolled_back = true;
            } else {
                if let Err(err) = connection.rollback().await {
                    tracing::warn!(error = %err, "failed to roll back batch transaction");
                }
                rolled_back = true;
            }
        }

        let status = if batch_error.is_some() {
            advance(&mut state, BatchState::Aborted);
            BatchStatus::Aborted
        } else {
            advance(&mut state, BatchState::Completed);
            BatchStatus::Completed
        };

        let total_execution_time = batch_start.elapsed();
        tracing::info!(
            statements = spans.len(),
            records = records.len(),
            success_count,
            failure_count,
            status = ?status,
            elapsed_ms = total_execution_time.as_millis() as u64,
            "batch finished"
        );

        BatchOutcome {
            records,
            status,
            error: batch_error,
            success_count,
            failure_count,
            total_execution_time,
            was_transactional: transactional,
            transaction_rolled_back: rolled_back,
        }
    }

    /// Execute one statement, racing it against cancellation and deadlines.
    ///
    /// A fired token or an expired deadline sends a server-side cancel
    /// request, waits for the session to settle, and surfaces as a
    /// connection-fatal error.
    async fn execute_statement(
        &self,
        connection: &Arc<dyn Connection>,
        sql: &str,
        batch_deadline: Option<tokio::time::Instant>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProvisionalResult>> {
        let statement_deadline = self
            .options
            .statement_timeout()
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let deadline = match (statement_deadline, batch_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let interrupt = tokio::select! {
            biased;
            _ = cancel.cancelled() => Interrupt::Cancelled,
            _ = expired => Interrupt::DeadlineExceeded,
            result = connection.execute(sql) => return result,
        };

        // The driver future is dropped by now, so the session is free for
        // the cancel request and the cleanup that follows it.
        interrupt_statement(connection).await;

        match interrupt {
            Interrupt::Cancelled => Err(SqlbatchError::Cancelled),
            Interrupt::DeadlineExceeded => Err(SqlbatchError::Timeout(format!(
                "statement exceeded its deadline: {}",
                sql_preview(sql)
            ))),
        }
    }
}

/// Why an in-flight statement was abandoned
enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

/// Cancel the abandoned statement on the server and wait until the session
/// can be reused, bounded by [`CANCEL_GRACE`].
async fn interrupt_statement(connection: &Arc<dyn Connection>) {
    let Some(handle) = connection.cancel_handle() else {
        tracing::warn!(
            driver = connection.driver_name(),
            "driver cannot cancel the running statement"
        );
        return;
    };

    let cleanup = async {
        handle.cancel().await;
        connection.settle_after_cancel().await
    };
    match tokio::time::timeout(CANCEL_GRACE, cleanup).await {
        Ok(Ok(())) => tracing::debug!("cancelled statement settled"),
        Ok(Err(err)) => tracing::warn!(error = %err, "session did not settle after cancel"),
        Err(_) => tracing::warn!(
            grace_ms = CANCEL_GRACE.as_millis() as u64,
            "gave up waiting for the cancelled statement"
        ),
    }
}

fn advance(state: &mut BatchState, next: BatchState) {
    debug_assert!(!state.is_terminal(), "batch already finished");
    tracing::trace!(from = ?state, to = ?next, "batch state");
    *state = next;
}

/// First characters of a statement for log output
pub(super) fn sql_preview(sql: &str) -> String {
    let sql = sql.trim();
    match sql.char_indices().nth(SQL_PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &sql[..end]),
        None => sql.to_string(),
    }
}
