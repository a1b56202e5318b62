//! Docker container management for integration tests.
//!
//! Containers are started lazily by the first test that needs them and cached
//! for the rest of the test process. Each test creates its own tables, so the
//! databases start empty.

use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::{mysql::Mysql, postgres::Postgres};

/// Connection details of a running test container
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    /// Host address (typically 127.0.0.1)
    pub host: String,
    /// Port number (randomly assigned by testcontainers)
    pub port: u16,
    /// Database name
    pub database: String,
    /// Username for authentication
    pub username: String,
    /// Password for authentication
    pub password: Option<String>,
}

struct RunningContainer<I: testcontainers::Image> {
    #[allow(dead_code)]
    inner: ContainerAsync<I>,
    info: ContainerInfo,
}

static POSTGRES_CONTAINER: Lazy<Arc<Mutex<Option<RunningContainer<Postgres>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

static MYSQL_CONTAINER: Lazy<Arc<Mutex<Option<RunningContainer<Mysql>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

fn cached<I: testcontainers::Image>(
    slot: &Mutex<Option<RunningContainer<I>>>,
    name: &str,
) -> anyhow::Result<Option<ContainerInfo>> {
    let guard = slot
        .lock()
        .map_err(|e| anyhow::anyhow!("failed to lock {} container: {}", name, e))?;
    Ok(guard.as_ref().map(|container| container.info.clone()))
}

fn store<I: testcontainers::Image>(
    slot: &Mutex<Option<RunningContainer<I>>>,
    name: &str,
    container: ContainerAsync<I>,
    info: &ContainerInfo,
) -> anyhow::Result<()> {
    let mut guard = slot
        .lock()
        .map_err(|e| anyhow::anyhow!("failed to lock {} container: {}", name, e))?;
    *guard = Some(RunningContainer {
        inner: container,
        info: info.clone(),
    });
    Ok(())
}

/// Get or start the PostgreSQL test container.
///
/// testcontainers-modules defaults: user `postgres`, password `postgres`,
/// database `postgres`.
pub async fn postgres_container() -> anyhow::Result<ContainerInfo> {
    if let Some(info) = cached(&POSTGRES_CONTAINER, "postgres")? {
        return Ok(info);
    }

    tracing::info!("starting PostgreSQL test container");
    let container = Postgres::default()
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start postgres container: {}", e))?;
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .map_err(|e| anyhow::anyhow!("failed to get postgres port: {}", e))?;

    let info = ContainerInfo {
        host: "127.0.0.1".to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: Some("postgres".to_string()),
    };
    tracing::info!(port, "PostgreSQL test container started");

    store(&POSTGRES_CONTAINER, "postgres", container, &info)?;
    Ok(info)
}

/// Get or start the MySQL test container.
///
/// testcontainers-modules defaults: user `root` without password, database
/// `test`.
pub async fn mysql_container() -> anyhow::Result<ContainerInfo> {
    if let Some(info) = cached(&MYSQL_CONTAINER, "mysql")? {
        return Ok(info);
    }

    tracing::info!("starting MySQL test container");
    let container = Mysql::default()
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start mysql container: {}", e))?;
    let port = container
        .get_host_port_ipv4(3306)
        .await
        .map_err(|e| anyhow::anyhow!("failed to get mysql port: {}", e))?;

    let info = ContainerInfo {
        host: "127.0.0.1".to_string(),
        port,
        database: "test".to_string(),
        username: "root".to_string(),
        password: None,
    };
    tracing::info!(port, "MySQL test container started");

    store(&MYSQL_CONTAINER, "mysql", container, &info)?;
    Ok(info)
}
