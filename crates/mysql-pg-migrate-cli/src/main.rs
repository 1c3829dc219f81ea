//! mysql-pg-migrate CLI - copy MySQL tables into an existing PostgreSQL schema.

use clap::Parser;
use mysql_pg_migrate::{Config, MigrateError, Migrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mysql-pg-migrate")]
#[command(about = "Copy records from MySQL into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Number of tables to process in parallel [default: 10]
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,

    /// PostgreSQL search path for the migration sessions
    #[arg(long, value_name = "PATH")]
    pg_search_path: Option<String>,

    /// Path to YAML configuration file (connection settings default to
    /// the MYSQL_* and PG* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(
        long,
        default_value = "info",
        value_parser = ["critical", "error", "warning", "info", "debug"]
    )]
    log_level: String,

    /// Log format: text or json
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    log_format: String,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Tables to copy (default: every table in the source database)
    tables: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, &cli.log_format);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?.with_env_defaults()?,
        None => Config::from_env()?,
    };
    if let Some(parallelism) = cli.parallelism {
        config.migration.parallelism = parallelism;
    }
    if let Some(search_path) = cli.pg_search_path {
        config.target.search_path = Some(search_path);
    }
    config.validate()?;

    let tables = if cli.tables.is_empty() {
        None
    } else {
        Some(cli.tables)
    };

    let cancel = setup_signal_handler();
    info!(
        "Copying {} with parallelism {}",
        tables
            .as_ref()
            .map(|t| format!("{} tables", t.len()))
            .unwrap_or_else(|| "all tables".to_string()),
        config.migration.parallelism
    );

    let migrator = Migrator::connect(&config).await?;
    let result = migrator.run(tables, cancel).await?;

    if cli.output_json {
        println!("{}", result.to_json()?);
    } else {
        info!(
            "Copied {} rows across {} tables in {:.2}s",
            result.rows_transferred, result.tables_total, result.duration_seconds
        );
        if result.sequences_failed > 0 {
            warn!("{} sequences could not be reset", result.sequences_failed);
        }
    }

    Ok(())
}

/// Install the tracing subscriber. Logs go to stderr so `--output-json`
/// keeps stdout clean.
fn setup_logging(log_level: &str, format: &str) {
    let level = match log_level {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warning" => Level::WARN,
        "error" | "critical" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Stopping after in-flight work unwinds...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Stopping after in-flight work unwinds...");
        token.cancel();
    });

    cancel_token
}
