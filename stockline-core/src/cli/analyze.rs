//! `analyze` command: one-shot composite analysis for a symbol.

use anyhow::Result;
use clap::Args;

use stockline_common::{AppConfig, AppContext};

/// Arguments for the analyze command
#[derive(Args)]
pub struct AnalyzeArgs {
    /// Ticker symbol, e.g. AAPL
    pub symbol: String,

    /// Trailing window in calendar days
    #[arg(long, default_value_t = 100)]
    pub days: i64,
}

pub async fn execute(args: AnalyzeArgs) -> Result<()> {
    let config = AppConfig::from_env()?;
    let context = AppContext::init(config).await?;

    let result = context.analyzer.analyze(&args.symbol, args.days).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    context.close().await;
    Ok(())
}
