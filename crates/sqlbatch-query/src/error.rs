//! Splitting and batch errors

use thiserror::Error;

/// Raised when a script cannot be split; no statement is attempted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("script is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("invalid DELIMITER directive on line {line}")]
    InvalidDelimiter { line: usize },
}

/// Error that ended a batch before every statement was attempted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error(transparent)]
    Split(#[from] SplitError),

    /// Statement `index` (0-based) hit a connection-level failure, a
    /// cancellation or a deadline
    #[error("statement {index} aborted the batch: {message}")]
    ConnectionFatal { index: usize, message: String },

    /// Statement `index` failed and the abort policy stopped the batch
    #[error("statement {index} failed: {message}")]
    StatementFailed { index: usize, message: String },

    #[error("transaction control failed: {message}")]
    Transaction { message: String },
}

impl BatchError {
    /// Index of the statement that aborted the batch, if any
    pub fn statement_index(&self) -> Option<usize> {
        match self {
            Self::ConnectionFatal { index, .. } | Self::StatementFailed { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}
