//! SQL gateway command-line entry point.
//!
//! Loads a single source from the environment, runs the SQL given as
//! arguments (or read from stdin) against it and prints the result as JSON
//! on stdout. Logs go to stderr.

use std::io::Read;

use anyhow::{bail, Context, Result};
use sql_gateway::{ConnectorManager, GatewayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let version = env!("CARGO_PKG_VERSION");
    info!(version, "SQL gateway starting");

    let sql = read_sql()?;

    let config = GatewayConfig::from_env().context("Failed to load configuration")?;
    let manager = ConnectorManager::with_defaults(config.sources)?;
    manager.start().await?;

    let result = tokio::select! {
        result = manager.execute(None, &sql, &[]) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            manager.disconnect().await;
            bail!("interrupted before the statement finished");
        }
    };

    manager.disconnect().await;

    match result {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {}", hint);
            }
            Err(anyhow::Error::new(e).context("Query failed"))
        }
    }
}

/// SQL from the command line, or stdin when no arguments are given.
fn read_sql() -> Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let sql = if args.is_empty() {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read SQL from stdin")?;
        buffer
    } else {
        args.join(" ")
    };

    if sql.trim().is_empty() {
        bail!("No SQL given. Usage: sql-gateway <SQL> or pipe SQL on stdin");
    }
    Ok(sql)
}

/// Initialize tracing subscriber with stderr output.
///
/// Logs MUST go to stderr because stdout carries the query result.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,sql_gateway=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
