//! `sqlbatch` - run a SQL script against one database and print one result
//! per statement.

mod config;
mod logging;
mod output;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlbatch_core::{Connection, Dialect, Engine};
use sqlbatch_drivers::DriverRegistry;
use sqlbatch_query::{BatchExecutor, CancellationToken};

use config::{BatchOverrides, ConnectionOverrides, FileConfig};
use logging::{LogFormat, LoggingConfig};
use output::OutputFormat;

/// Exit code for usage, configuration and connection errors
const EXIT_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "sqlbatch", version, about = "Split and execute SQL scripts statement by statement")]
struct Cli {
    /// Log line format (stderr)
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a script and print one result per statement
    Run(RunArgs),
    /// Print the statements a script splits into, without executing them
    Split(SplitArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML file with [connection] and [batch] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target engine (mysql, mariadb, tidb, postgres, cockroachdb, redshift)
    #[arg(short, long)]
    engine: Option<Engine>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    database: Option<String>,

    #[arg(short, long)]
    user: Option<String>,

    #[arg(long, env = "SQLBATCH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Splitting rules; defaults to the engine's dialect
    #[arg(long)]
    dialect: Option<Dialect>,

    /// Script to run; reads stdin when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Stop at the first failing statement
    #[arg(long)]
    abort_on_error: bool,

    /// Run the whole script in one transaction
    #[arg(long)]
    transaction: bool,

    #[arg(long)]
    statement_timeout_ms: Option<u64>,

    #[arg(long)]
    batch_timeout_ms: Option<u64>,

    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct SplitArgs {
    #[arg(long)]
    dialect: Dialect,

    /// Script to split; reads stdin when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,
}

fn read_script(file: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .context("failed to read script from stdin")?;
            Ok(bytes)
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let connection_config = ConnectionOverrides {
        engine: args.engine,
        host: args.host,
        port: args.port,
        database: args.database,
        user: args.user,
        password: args.password,
    }
    .apply(file.connection)?;

    let options = BatchOverrides {
        abort_on_error: args.abort_on_error,
        transaction: args.transaction,
        statement_timeout_ms: args.statement_timeout_ms,
        batch_timeout_ms: args.batch_timeout_ms,
    }
    .apply(file.batch);

    let script = read_script(args.file.as_deref())?;

    let registry = DriverRegistry::with_defaults();
    let connection: Arc<dyn Connection> = registry.connect(&connection_config).await.with_context(|| {
        format!(
            "failed to connect to {} at {}:{}",
            connection_config.engine,
            connection_config.host,
            connection_config.get_port()
        )
    })?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling running statement");
            ctrl_c.cancel();
        }
    });

    let outcome = BatchExecutor::new(options)
        .run_bytes(&script, args.dialect, &connection, cancel)
        .await;

    match args.format {
        OutputFormat::Table => println!("{}", output::outcome_text(&outcome)),
        OutputFormat::Json => println!("{}", output::outcome_json(&outcome)?),
    }

    Ok(if outcome.is_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn split(args: SplitArgs) -> anyhow::Result<ExitCode> {
    let script = read_script(args.file.as_deref())?;
    let spans = sqlbatch_query::split_bytes(&script, args.dialect)?;
    match args.format {
        OutputFormat::Table => println!("{}", output::spans_text(&spans)),
        OutputFormat::Json => println!("{}", output::spans_json(&spans)?),
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig::default()
        .with_format(cli.log_format)
        .with_verbosity(cli.verbose);
    if let Err(err) = logging::init(logging) {
        eprintln!("warning: logging disabled: {err:#}");
    }

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Split(args) => split(args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "sqlbatch failed");
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
