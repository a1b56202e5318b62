//! MySQL-family execution adapter (MySQL, MariaDB, TiDB)

mod connection;
mod driver;

pub use connection::{MySqlCancelHandle, MySqlConnection};
pub use driver::MySqlDriver;
