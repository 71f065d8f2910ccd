//! Command-line interface
//!
//! One file per command, dispatched from `main`.

pub mod analyze;
pub mod convert;
pub mod health;
pub mod serve;

use clap::{Parser, Subcommand};

/// Stockline CLI
#[derive(Parser)]
#[command(name = "stockline")]
#[command(about = "TTL-governed cache and storage fabric for stock analytics")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the fabric service with background maintenance
    Serve(serve::ServeArgs),
    /// Analyze a symbol and print the composite result
    Analyze(analyze::AnalyzeArgs),
    /// Convert an amount between currencies
    Convert(convert::ConvertArgs),
    /// Print the storage health snapshot and cache counters
    Health(health::HealthArgs),
}
