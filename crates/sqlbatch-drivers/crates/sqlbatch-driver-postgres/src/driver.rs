//! PostgreSQL driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sqlbatch_core::{
    Connection, ConnectionConfig, DatabaseDriver, Dialect, Engine, Result, SqlbatchError,
};

use crate::PostgresConnection;

/// PostgreSQL database driver
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver instance
    pub fn new() -> Self {
        tracing::debug!("PostgreSQL driver initialized");
        Self
    }

    /// Translate a `ConnectionConfig` into a tokio-postgres config
    pub fn build_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.get_port())
            .dbname(config.database.as_deref().unwrap_or("postgres"))
            .application_name(
                config
                    .params
                    .get("application_name")
                    .map(String::as_str)
                    .unwrap_or("sqlbatch"),
            );

        if let Some(user) = config.get_string("user") {
            pg.user(&user);
        }
        if let Some(password) = &config.password {
            pg.password(password);
        }
        if let Some(timeout) = config.params.get("connect_timeout") {
            let seconds = timeout.parse::<u64>().map_err(|_| {
                SqlbatchError::Configuration(format!("invalid connect_timeout '{}'", timeout))
            })?;
            pg.connect_timeout(Duration::from_secs(seconds));
        }
        Ok(pg)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn id(&self) -> &'static str {
        "postgres"
    }

    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    fn engines(&self) -> &'static [Engine] {
        &[Engine::Postgres, Engine::CockroachDb, Engine::Redshift]
    }

    fn default_port(&self) -> u16 {
        5432
    }

    #[tracing::instrument(skip(self, config), fields(engine = %config.engine, host = %config.host, database = config.database.as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let pg_config = Self::build_config(config)?;

        let conn = PostgresConnection::connect(pg_config).await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect to PostgreSQL database");
            e
        })?;

        tracing::info!(host = %config.host, port = config.get_port(), "PostgreSQL connection created");
        Ok(Arc::new(conn))
    }
}
