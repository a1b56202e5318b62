//! SQL dialect families and the engines that speak them
//!
//! Splitting rules and result decoding only differ per *family*, so every
//! concrete engine maps onto exactly one [`Dialect`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SqlbatchError;

/// Lexical dialect family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// MySQL, MariaDB, TiDB
    MySql,
    /// PostgreSQL, CockroachDB, Redshift
    PostgreSql,
}

impl Dialect {
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::MySql => "MySQL",
            Dialect::PostgreSql => "PostgreSQL",
        }
    }

    /// Whether the client-side `DELIMITER` directive is understood
    pub fn supports_delimiter_directive(&self) -> bool {
        matches!(self, Dialect::MySql)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Dialect {
    type Err = SqlbatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::PostgreSql),
            other => Engine::from_str(other).map(|engine| engine.dialect()),
        }
    }
}

/// A concrete database engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    MySql,
    MariaDb,
    TiDb,
    Postgres,
    CockroachDb,
    Redshift,
}

impl Engine {
    pub const ALL: [Engine; 6] = [
        Engine::MySql,
        Engine::MariaDb,
        Engine::TiDb,
        Engine::Postgres,
        Engine::CockroachDb,
        Engine::Redshift,
    ];

    /// The dialect family this engine belongs to
    pub fn dialect(&self) -> Dialect {
        match self {
            Engine::MySql | Engine::MariaDb | Engine::TiDb => Dialect::MySql,
            Engine::Postgres | Engine::CockroachDb | Engine::Redshift => Dialect::PostgreSql,
        }
    }

    /// Identifier used on the command line and in config files
    pub fn id(&self) -> &'static str {
        match self {
            Engine::MySql => "mysql",
            Engine::MariaDb => "mariadb",
            Engine::TiDb => "tidb",
            Engine::Postgres => "postgres",
            Engine::CockroachDb => "cockroachdb",
            Engine::Redshift => "redshift",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Engine::MySql | Engine::MariaDb => 3306,
            Engine::TiDb => 4000,
            Engine::Postgres => 5432,
            Engine::CockroachDb => 26257,
            Engine::Redshift => 5439,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Engine {
    type Err = SqlbatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Engine::MySql),
            "mariadb" => Ok(Engine::MariaDb),
            "tidb" => Ok(Engine::TiDb),
            "postgres" | "postgresql" | "pg" => Ok(Engine::Postgres),
            "cockroachdb" | "cockroach" | "crdb" => Ok(Engine::CockroachDb),
            "redshift" => Ok(Engine::Redshift),
            other => Err(SqlbatchError::Configuration(format!(
                "unknown engine '{}'",
                other
            ))),
        }
    }
}
