//! sitedb Binary Entry Point
//!
//! Small operator tool over the storage layer: initialize a backend, bootstrap
//! the content schema and run ad-hoc canonical queries against it.
//! Core functionality is provided by the `sitedb` library crate.

use std::time::Duration;

use clap::{Parser, Subcommand};
use sitedb::{
    BackendKind, Storage, Value,
    config::{AppConfig, parse_duration},
    storage::schema::init_schema,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sitedb - Multi-Backend Site Storage
#[derive(Parser, Debug)]
#[command(name = "sitedb", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, env = "SITEDB_CONFIG")]
    config: Option<String>,

    /// Database driver: mysql, postgres or sqlite (overrides config file)
    #[arg(long, env = "SITEDB_DB_DRIVER")]
    db_driver: Option<BackendKind>,

    /// Database URL for networked drivers (overrides config file)
    #[arg(long, env = "SITEDB_DB_URL")]
    db_url: Option<String>,

    /// SQLite snapshot path (overrides config file)
    #[arg(long, env = "SITEDB_DB_PATH")]
    db_path: Option<String>,

    /// Time to wait for a pooled connection, e.g. `5s` (overrides config file)
    #[arg(long, value_parser = parse_duration)]
    connect_timeout: Option<Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the backend and create missing content tables
    Init,
    /// Execute parameterless SQL
    Exec {
        /// SQL text, possibly several statements
        sql: String,
    },
    /// Execute a mutating statement and print its inserted id
    Run {
        /// Canonical SQL with `?` placeholders
        sql: String,
        /// Positional parameters
        params: Vec<String>,
    },
    /// Print the first matching row, or null
    Get {
        /// Canonical SQL with `?` placeholders
        sql: String,
        /// Positional parameters
        params: Vec<String>,
    },
    /// Print every matching row
    All {
        /// Canonical SQL with `?` placeholders
        sql: String,
        /// Positional parameters
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sitedb=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file, or start from defaults
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(driver) = cli.db_driver {
        config.database.driver = driver;
    }
    if let Some(url) = cli.db_url {
        config.database.url = Some(url);
    }
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(timeout) = cli.connect_timeout {
        config.database.connect_timeout = timeout;
    }
    config.validate()?;

    // The URL may carry credentials; only the snapshot path is logged.
    if config.database.driver.is_networked() {
        tracing::info!(backend = %config.database.driver, "Storage configured");
    } else {
        tracing::info!(
            backend = %config.database.driver,
            path = %config.database.path,
            "Storage configured"
        );
    }

    let storage = Storage::from_config(&config.database);
    let db = storage.init().await?;
    tracing::info!("Storage initialized");

    match cli.command {
        Command::Init => {
            init_schema(&db).await?;
        }
        Command::Exec { sql } => {
            if config.bootstrap_schema {
                init_schema(&db).await?;
            }
            db.exec(&sql).await?;
        }
        Command::Run { sql, params } => {
            if config.bootstrap_schema {
                init_schema(&db).await?;
            }
            let result = db.prepare(&sql).run(&parse_params(&params)).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Get { sql, params } => {
            let row = db.prepare(&sql).get(&parse_params(&params)).await?;
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        Command::All { sql, params } => {
            let rows = db.prepare(&sql).all(&parse_params(&params)).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

/// Interpret command-line parameters: `null`, `true`/`false`, integer, float,
/// otherwise text.
fn parse_params(raw: &[String]) -> Vec<Value> {
    raw.iter().map(|s| parse_param(s)).collect()
}

fn parse_param(raw: &str) -> Value {
    match raw {
        "null" => Value::Null,
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => {
            if let Ok(v) = raw.parse::<i64>() {
                Value::Integer(v)
            } else if let Ok(v) = raw.parse::<f64>() {
                Value::Real(v)
            } else {
                Value::Text(raw.to_string())
            }
        }
    }
}
