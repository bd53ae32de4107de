//! asyncdb Binary Entry Point
//!
//! Runs single statements against the database described by a YAML config.
//! Core functionality is provided by the `asyncdb` library crate.

use std::time::Duration;

use asyncdb::{
    AsyncDatabase, Params,
    config::{AppConfig, parse_duration},
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// asyncdb - Async Database Access Layer
#[derive(Parser, Debug)]
#[command(name = "asyncdb", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "ASYNCDB_CONFIG"
    )]
    config: String,

    /// Maximum retries (overrides config file)
    #[arg(long, env = "ASYNCDB_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Initial retry delay, e.g. `200ms` (overrides config file)
    #[arg(long, env = "ASYNCDB_INITIAL_DELAY", value_parser = parse_duration)]
    initial_delay: Option<Duration>,

    /// Log parameter values along with queries
    #[arg(long)]
    log_params: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a query and print the rows as JSON
    Query {
        /// SQL text
        sql: String,

        /// Parameters as JSON: an object for `:name`, an array for positional
        #[arg(short, long)]
        params: Option<String>,
    },
    /// Execute a statement and print the affected row count
    Exec {
        /// SQL text
        sql: String,

        /// Parameters as JSON: an object for `:name`, an array for positional
        #[arg(short, long)]
        params: Option<String>,
    },
    /// Execute a statement once per parameter set, atomically
    Batch {
        /// SQL text
        sql: String,

        /// JSON array of parameter sets
        #[arg(short, long)]
        params: String,
    },
    /// Check connectivity
    Ping,
}

fn parse_params(raw: Option<&str>) -> Result<Params, serde_json::Error> {
    raw.map_or(Ok(Params::None), |raw| {
        serde_json::from_str::<Value>(raw).map(Params::from)
    })
}

async fn run(db: &AsyncDatabase, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Query { sql, params } => {
            let rows = db.fetch_all(&sql, parse_params(params.as_deref())?).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Exec { sql, params } => {
            let output = db
                .execute(&sql, parse_params(params.as_deref())?, false)
                .await?;
            println!("{}", output.rows_affected().unwrap_or_default());
        }
        Command::Batch { sql, params } => {
            let sets: Vec<Value> = serde_json::from_str(&params)?;
            let affected = db.execute_many(&sql, sets).await?;
            println!("{}", affected);
        }
        Command::Ping => {
            db.ping().await?;
            println!("ok");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,asyncdb=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(max_retries) = cli.max_retries {
        config.client.max_retries = max_retries;
    }
    if let Some(delay) = cli.initial_delay {
        config.client.initial_delay = delay;
    }
    if cli.log_params {
        config.client.log_params = true;
    }
    config.validate()?;

    let db = config.connect()?;
    tracing::info!("Backend: {}", db.backend_kind());

    let result = interruptible(run(&db, cli.command), tokio::signal::ctrl_c()).await;

    db.close().await;
    result
}

/// Run `operation` unless `interrupt` fires first.
///
/// An interrupted operation is dropped, which rolls back its session, and
/// reported as an error so the process exits non-zero.
async fn interruptible<F, S, T>(operation: F, interrupt: S) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = Result<(), Box<dyn std::error::Error>>>,
    S: Future<Output = T>,
{
    tokio::select! {
        result = operation => result,
        _ = interrupt => {
            tracing::warn!("Received Ctrl+C signal, operation cancelled");
            Err("interrupted by Ctrl+C; the operation was rolled back".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_is_an_error() {
        let result = interruptible(std::future::pending(), async {}).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("interrupted"));
    }

    #[tokio::test]
    async fn test_completed_operation_passes_through() {
        assert!(interruptible(async { Ok(()) }, std::future::pending::<()>()).await.is_ok());

        let failed = interruptible(async { Err("boom".into()) }, std::future::pending::<()>()).await;
        assert_eq!(failed.unwrap_err().to_string(), "boom");
    }

    #[test]
    fn test_parse_params() {
        assert!(parse_params(None).unwrap().is_empty());
        assert!(matches!(
            parse_params(Some(r#"{"id": 1}"#)).unwrap(),
            Params::Named(_)
        ));
        assert!(parse_params(Some("{not json")).is_err());
    }
}
