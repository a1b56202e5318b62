//! sqlbatch core - shared types and traits for the batch engine
//!
//! This crate defines:
//!
//! - `Connection` - the execution seam each engine adapter implements
//! - `DatabaseDriver` - opens connections from a `ConnectionConfig`
//! - `Dialect` / `Engine` - lexical families and the engines in them
//! - `Value`, `Row`, `ColumnMeta`, `ProvisionalResult`
//! - `SqlbatchError`

mod connection;
mod dialect;
mod driver;
mod error;
mod types;

pub use connection::*;
pub use dialect::*;
pub use driver::*;
pub use error::*;
pub use types::*;
