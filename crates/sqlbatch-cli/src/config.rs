//! Config file loading and flag overrides

use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;
use sqlbatch_core::{ConnectionConfig, Engine};
use sqlbatch_query::{BatchOptions, ErrorPolicy};

/// Contents of a `--config` TOML file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub connection: Option<ConnectionConfig>,
    #[serde(default)]
    pub batch: BatchOptions,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(source: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

/// Connection settings given on the command line
#[derive(Debug, Default, Clone)]
pub struct ConnectionOverrides {
    pub engine: Option<Engine>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionOverrides {
    /// Apply flags on top of the file's `[connection]` table.
    ///
    /// An engine given on the command line that differs from the file's
    /// keeps the file's other settings but resets the port to the new
    /// engine's default unless `--port` is also given.
    pub fn apply(self, base: Option<ConnectionConfig>) -> anyhow::Result<ConnectionConfig> {
        let mut config = match (base, self.engine) {
            (Some(mut config), Some(engine)) => {
                if config.engine != engine {
                    config.port = 0;
                }
                config.engine = engine;
                config
            }
            (Some(config), None) => config,
            (None, Some(engine)) => ConnectionConfig::new(engine),
            (None, None) => bail!("no engine given; pass --engine or a [connection] table"),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = self.database {
            config.database = Some(database);
        }
        if let Some(user) = self.user {
            config.username = Some(user);
        }
        if let Some(password) = self.password {
            config.password = Some(password);
        }
        Ok(config)
    }
}

/// Batch settings given on the command line
#[derive(Debug, Default, Clone)]
pub struct BatchOverrides {
    pub abort_on_error: bool,
    pub transaction: bool,
    pub statement_timeout_ms: Option<u64>,
    pub batch_timeout_ms: Option<u64>,
}

impl BatchOverrides {
    pub fn apply(self, mut options: BatchOptions) -> BatchOptions {
        if self.abort_on_error {
            options.on_error = ErrorPolicy::Abort;
        }
        if self.transaction {
            options.transaction = true;
        }
        if let Some(timeout) = self.statement_timeout_ms {
            options.statement_timeout_ms = timeout;
        }
        if let Some(timeout) = self.batch_timeout_ms {
            options.batch_timeout_ms = timeout;
        }
        options
    }
}
