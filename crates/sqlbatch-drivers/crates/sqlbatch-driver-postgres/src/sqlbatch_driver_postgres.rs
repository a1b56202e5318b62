//! PostgreSQL-family execution adapter (PostgreSQL, CockroachDB, Redshift)

mod connection;
mod driver;

pub use connection::{PostgresCancelHandle, PostgresConnection};
pub use driver::PostgresDriver;
