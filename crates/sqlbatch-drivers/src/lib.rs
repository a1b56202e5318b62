//! sqlbatch drivers - engine-family adapters behind one registry
//!
//! This crate re-exports the feature-gated adapter crates and provides
//! [`DriverRegistry`], which resolves an [`Engine`] to the driver that serves it.

#[cfg(feature = "mysql")]
pub use sqlbatch_driver_mysql as mysql;
#[cfg(feature = "postgres")]
pub use sqlbatch_driver_postgres as postgres;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from sqlbatch-core
pub use sqlbatch_core::{
    ColumnMeta, Connection, ConnectionConfig, DatabaseDriver, Dialect, Engine, ProvisionalResult, Result, Row, SqlbatchError, Value,
};
