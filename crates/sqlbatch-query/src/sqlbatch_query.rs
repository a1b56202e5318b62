//! sqlbatch query - split scripts and run them as batches
//!
//! This crate provides:
//!
//! - [`split`] / [`split_bytes`]: dialect-aware statement splitting
//! - [`normalize`]: engine-native results to [`ResultRecord`]s
//! - [`BatchExecutor`]: ordered execution with error policy, deadlines,
//!   cancellation and optional transaction wrapping

pub mod batch;
mod error;
mod normalizer;
pub mod splitter;

pub use batch::{BatchExecutor, BatchOptions, BatchOutcome, BatchState, BatchStatus, ErrorPolicy};
pub use error::{BatchError, SplitError};
pub use normalizer::{AFFECTED_ROWS_COLUMN, AFFECTED_ROWS_TYPE, ResultRecord, normalize};
pub use splitter::{Position, StatementSpan, split, split_bytes};

pub use tokio_util::sync::CancellationToken;
