//! Database driver trait definition

use crate::{Connection, Dialect, Engine, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Driver for one engine family.
///
/// Drivers only open connections; the batch engine receives the finished
/// [`Connection`] and never calls back into the driver.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "postgres", "mysql")
    fn id(&self) -> &'static str;

    /// Human-readable name (e.g., "PostgreSQL", "MySQL")
    fn name(&self) -> &'static str;

    /// Dialect family shared by every engine this driver serves
    fn dialect(&self) -> Dialect;

    /// Engines reachable through this driver
    fn engines(&self) -> &'static [Engine];

    /// Default connection port
    fn default_port(&self) -> u16;

    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Target engine
    pub engine: Engine,
    /// Host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number (0 for the engine default)
    #[serde(default)]
    pub port: u16,
    /// Database name
    #[serde(default)]
    pub database: Option<String>,
    /// Username
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    /// Password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Additional connection parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl ConnectionConfig {
    /// Create a new configuration with default values
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            host: default_host(),
            port: 0,
            database: None,
            username: None,
            password: None,
            params: HashMap::new(),
        }
    }

    /// Create a PostgreSQL configuration
    pub fn new_postgres(host: &str, port: u16, database: &str, username: &str) -> Self {
        let mut config = Self::new(Engine::Postgres);
        config.host = host.to_string();
        config.port = port;
        config.database = Some(database.to_string());
        config.username = Some(username.to_string());
        config
    }

    /// Create a MySQL configuration
    pub fn new_mysql(host: &str, port: u16, database: &str, username: &str) -> Self {
        let mut config = Self::new(Engine::MySql);
        config.host = host.to_string();
        config.port = port;
        config.database = Some(database.to_string());
        config.username = Some(username.to_string());
        config
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let val = value.into();
        let str_val = match val {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.params.insert(key.to_string(), str_val);
        self
    }

    /// Get a string parameter
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        match key {
            "host" => Some(self.host.clone()),
            "database" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }

    /// Port to connect to, falling back to the engine default
    pub fn get_port(&self) -> u16 {
        if self.port == 0 {
            self.engine.default_port()
        } else {
            self.port
        }
    }
}
