//! Stockline CLI
//!
//! Provides commands for:
//! - `serve`: run the fabric with its background maintenance loop
//! - `analyze`: produce the composite analysis for a symbol
//! - `convert`: convert an amount between currencies
//! - `health`: print the storage health snapshot and cache counters
//!
//! # Logging Configuration
//!
//! Configure via environment variables:
//! - `RUST_LOG`: log filter (e.g. "stockline_common=debug,sqlx=warn")
//! - `LOG_FORMAT`: output format ("pretty", "compact", "json")

use anyhow::Result;
use clap::Parser;
use stockline_common::logging::{init_logging, LogConfig};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env()
        .with_default_level("stockline=info,stockline_common=info,sqlx=warn");
    init_logging(log_config).map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => cli::serve::execute(args).await?,
        Commands::Analyze(args) => cli::analyze::execute(args).await?,
        Commands::Convert(args) => cli::convert::execute(args).await?,
        Commands::Health(args) => cli::health::execute(args).await?,
    }

    Ok(())
}
