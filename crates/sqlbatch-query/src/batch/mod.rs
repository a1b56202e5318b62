//! Batch execution module
//!
//! Drives the statements of a script against one connection in source
//! order, with a continue/abort error policy, deadlines, cancellation and an
//! optional whole-batch transaction.

mod executor;
#[cfg(test)]
mod tests;

pub use executor::{
    BatchExecutor, BatchOptions, BatchOutcome, BatchState, BatchStatus, ErrorPolicy,
};
