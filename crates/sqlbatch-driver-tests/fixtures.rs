//! Test fixtures for running batches against real servers.
//!
//! Tests identify their target with [`TestDriver`] and obtain a connection
//! through [`test_connection`]. Docker containers are managed automatically;
//! set `SQLBATCH_TEST_MANUAL_CONTAINERS=1` to use servers that are already
//! running (PostgreSQL on 127.0.0.1:5433, MySQL on 127.0.0.1:3307, user
//! `test_user`, password `test_password`, database `sqlbatch`).
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlbatch_driver_tests::fixtures::{TestDriver, test_connection};
//! use rstest::rstest;
//!
//! #[rstest]
//! #[case::postgres(TestDriver::Postgres)]
//! #[case::mysql(TestDriver::Mysql)]
//! #[tokio::test]
//! async fn test_select(#[case] driver: TestDriver) -> anyhow::Result<()> {
//!     let Some(conn) = test_connection(driver).await? else {
//!         return Ok(());
//!     };
//!     let results = conn.execute("SELECT 1").await?;
//!     assert_eq!(results.len(), 1);
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use sqlbatch_core::{Connection, ConnectionConfig, Dialect, Engine};
use sqlbatch_drivers::DriverRegistry;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::test_containers::{mysql_container, postgres_container};

/// Test target for parameterized testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestDriver {
    /// PostgreSQL family
    Postgres,
    /// MySQL family
    Mysql,
}

impl TestDriver {
    /// Engine the test server runs
    pub fn engine(&self) -> Engine {
        match self {
            TestDriver::Postgres => Engine::Postgres,
            TestDriver::Mysql => Engine::MySql,
        }
    }

    /// Dialect used to split scripts for this server
    pub fn dialect(&self) -> Dialect {
        self.engine().dialect()
    }

    /// Get the display name
    pub fn display_name(&self) -> &'static str {
        match self {
            TestDriver::Postgres => "PostgreSQL",
            TestDriver::Mysql => "MySQL",
        }
    }
}

/// Both engine families
pub fn all_drivers() -> Vec<TestDriver> {
    vec![TestDriver::Postgres, TestDriver::Mysql]
}

/// Check if tests should use manually managed servers instead of testcontainers
fn use_manual_containers() -> bool {
    env::var("SQLBATCH_TEST_MANUAL_CONTAINERS")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .map(|v| v != 0)
        .unwrap_or(false)
}

/// Whether a Docker daemon looks reachable from this process
pub fn docker_available() -> bool {
    env::var_os("DOCKER_HOST").is_some() || Path::new("/var/run/docker.sock").exists()
}

/// Initialize logging for tests if not already initialized
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlbatch_query=debug"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Connection configuration for the test server of `driver`
async fn connection_config(driver: TestDriver) -> Result<ConnectionConfig> {
    if use_manual_containers() {
        let port = match driver {
            TestDriver::Postgres => 5433,
            TestDriver::Mysql => 3307,
        };
        let mut config = ConnectionConfig::new(driver.engine());
        config.host = "127.0.0.1".to_string();
        config.port = port;
        config.database = Some("sqlbatch".to_string());
        config.username = Some("test_user".to_string());
        return Ok(config.with_password("test_password"));
    }

    let info = match driver {
        TestDriver::Postgres => postgres_container()
            .await
            .context("failed to start PostgreSQL container - is Docker running?")?,
        TestDriver::Mysql => mysql_container()
            .await
            .context("failed to start MySQL container - is Docker running?")?,
    };

    let mut config = match driver {
        TestDriver::Postgres => {
            ConnectionConfig::new_postgres(&info.host, info.port, &info.database, &info.username)
        }
        TestDriver::Mysql => {
            ConnectionConfig::new_mysql(&info.host, info.port, &info.database, &info.username)
        }
    };
    config.password = info.password;
    Ok(config)
}

/// Connect with linear backoff; servers may still be starting up
async fn wait_for_database_ready(
    config: &ConnectionConfig,
    max_attempts: u32,
    base_delay_secs: u64,
) -> Result<Arc<dyn Connection>> {
    let registry = DriverRegistry::with_defaults();
    let mut attempt = 1;

    loop {
        match registry.connect(config).await {
            Ok(conn) => {
                conn.execute("SELECT 1").await.context("readiness probe failed")?;
                if attempt > 1 {
                    tracing::info!(engine = %config.engine, attempts = attempt, "database ready after retry");
                }
                return Ok(conn);
            }
            Err(e) if attempt < max_attempts => {
                let delay = Duration::from_secs(base_delay_secs * attempt as u64);
                tracing::warn!(
                    engine = %config.engine,
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "database not ready, retrying..."
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).context(format!(
                    "database not ready after {} attempts",
                    max_attempts
                ));
            }
        }
    }
}

/// Open a connection to the test server of `driver`.
///
/// Returns `Ok(None)` (after logging why) when no Docker daemon is
/// reachable, so callers can skip.
pub async fn test_connection(driver: TestDriver) -> Result<Option<Arc<dyn Connection>>> {
    initialize_logging();

    if !use_manual_containers() && !docker_available() {
        tracing::warn!(
            driver = driver.display_name(),
            "Docker is not reachable, skipping integration test"
        );
        return Ok(None);
    }

    let config = connection_config(driver).await?;
    let conn = wait_for_database_ready(&config, 5, 2).await?;
    Ok(Some(conn))
}

/// A table name unique to one test
pub fn unique_table(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Drop a table created by a test, ignoring errors
pub async fn drop_table(conn: &Arc<dyn Connection>, table: &str) {
    if let Err(e) = conn.execute(&format!("DROP TABLE IF EXISTS {}", table)).await {
        tracing::warn!(table, error = %e, "failed to drop test table");
    }
}
