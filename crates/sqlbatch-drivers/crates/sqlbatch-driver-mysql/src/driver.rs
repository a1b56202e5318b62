//! MySQL driver implementation

use async_trait::async_trait;
use mysql_async::{Opts, OptsBuilder};
use std::sync::Arc;
use sqlbatch_core::{
    Connection, ConnectionConfig, DatabaseDriver, Dialect, Engine, Result, SqlbatchError,
};

use crate::MySqlConnection;

/// MySQL database driver
pub struct MySqlDriver;

impl MySqlDriver {
    /// Create a new MySQL driver instance
    pub fn new() -> Self {
        tracing::debug!("MySQL driver initialized");
        Self
    }

    /// Translate a `ConnectionConfig` into mysql_async options
    pub fn build_opts(config: &ConnectionConfig) -> Result<Opts> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.get_port())
            .prefer_socket(false)
            .db_name(config.database.clone())
            .user(config.get_string("user"))
            .pass(config.password.clone());

        if let Some(timeout) = config.params.get("wait_timeout") {
            let seconds = timeout.parse::<usize>().map_err(|_| {
                SqlbatchError::Configuration(format!("invalid wait_timeout '{}'", timeout))
            })?;
            builder = builder.wait_timeout(Some(seconds));
        }
        Ok(builder.into())
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn id(&self) -> &'static str {
        "mysql"
    }

    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn engines(&self) -> &'static [Engine] {
        &[Engine::MySql, Engine::MariaDb, Engine::TiDb]
    }

    fn default_port(&self) -> u16 {
        3306
    }

    #[tracing::instrument(skip(self, config), fields(engine = %config.engine, host = %config.host, database = config.database.as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let opts = Self::build_opts(config)?;

        let conn = MySqlConnection::connect(opts).await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect to MySQL database");
            e
        })?;

        tracing::info!(host = %config.host, port = config.get_port(), "MySQL connection created");
        Ok(Arc::new(conn))
    }
}
