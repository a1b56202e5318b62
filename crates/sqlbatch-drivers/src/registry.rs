//! Driver registry for managing available database drivers

use std::collections::HashMap;
use std::sync::Arc;
use sqlbatch_core::{Connection, ConnectionConfig, DatabaseDriver, Engine, Result, SqlbatchError};

/// Registry of available database drivers, indexed by the engines they serve
pub struct DriverRegistry {
    drivers: HashMap<Engine, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDriver::new()));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MySqlDriver::new()));

        registry
    }

    /// Register a driver for every engine it declares
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        tracing::info!(driver = driver.id(), name = driver.name(), "registering database driver");
        for engine in driver.engines() {
            self.drivers.insert(*engine, Arc::clone(&driver));
        }
    }

    /// Get the driver serving an engine
    pub fn get(&self, engine: Engine) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(&engine).cloned();
        if driver.is_none() {
            tracing::warn!(engine = %engine, "driver not found in registry");
        }
        driver
    }

    /// Check if an engine has a registered driver
    pub fn has(&self, engine: Engine) -> bool {
        self.drivers.contains_key(&engine)
    }

    /// List all engines with a registered driver
    pub fn engines(&self) -> Vec<Engine> {
        let mut engines: Vec<Engine> = self.drivers.keys().copied().collect();
        engines.sort_by_key(|engine| engine.id());
        engines
    }

    /// Open a connection for the engine named in `config`
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let driver = self.get(config.engine).ok_or_else(|| {
            SqlbatchError::NotSupported(format!(
                "no driver compiled in for engine '{}'",
                config.engine
            ))
        })?;
        driver.connect(config).await
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
