//! Logging setup for the `sqlbatch` binary
//!
//! Events go to stderr so result output on stdout stays machine readable.
//! `RUST_LOG` takes precedence over the configured default filter.

use clap::ValueEnum;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable, colored when stderr is a terminal
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open/close (statement and batch timings)
    pub enable_spans: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            include_location: false,
            enable_spans: false,
            default_filter: "warn,sqlbatch=info,sqlbatch_query=info,sqlbatch_drivers=info"
                .to_string(),
        }
    }
}

impl LoggingConfig {
    /// Raise verbosity by `-v` count: 1 = debug for sqlbatch crates, 2+ = trace
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        match verbose {
            0 => {}
            1 => {
                self.default_filter = "info,sqlbatch=debug,sqlbatch_query=debug,sqlbatch_drivers=debug,sqlbatch_driver_postgres=debug,sqlbatch_driver_mysql=debug".to_string();
                self.enable_spans = true;
            }
            _ => {
                self.default_filter = "debug,sqlbatch=trace,sqlbatch_query=trace".to_string();
                self.enable_spans = true;
                self.include_location = true;
            }
        }
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Install the global subscriber.
pub fn init(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))?;

    // NEW fires once per span; ENTER would repeat on every async re-poll
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}
