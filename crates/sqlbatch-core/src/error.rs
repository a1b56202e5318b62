//! Error types for sqlbatch

use thiserror::Error;

/// Core error type for sqlbatch operations
#[derive(Error, Debug)]
pub enum SqlbatchError {
    /// The connection could not be established or was lost mid-batch.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A native error raised by the server for one statement (syntax,
    /// constraint violation, permission denied, ...).
    #[error("{message}")]
    Statement {
        message: String,
        /// SQLSTATE (PostgreSQL) or server error number (MySQL)
        code: Option<String>,
    },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,
}

impl SqlbatchError {
    /// Build a statement-level error with an optional native code.
    pub fn statement(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Statement {
            message: message.into(),
            code,
        }
    }

    /// Whether this error must abort the whole batch regardless of policy.
    ///
    /// Only statement-level errors are recoverable; everything else means the
    /// connection can no longer be trusted to run the rest of the script.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::Statement { .. })
    }

    /// Native error code, when the server supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Statement { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for sqlbatch operations
pub type Result<T> = std::result::Result<T, SqlbatchError>;
