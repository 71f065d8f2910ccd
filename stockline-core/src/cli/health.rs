//! `health` command: storage snapshot plus cache counters.

use anyhow::Result;
use clap::Args;

use stockline_common::{AppConfig, AppContext};

/// Arguments for the health command
#[derive(Args)]
pub struct HealthArgs {
    /// Also run one maintenance cycle before reporting
    #[arg(long, default_value_t = false)]
    pub reap: bool,
}

pub async fn execute(args: HealthArgs) -> Result<()> {
    let config = AppConfig::from_env()?;
    let context = AppContext::init(config).await?;

    if args.reap {
        let reaped = context.storage.reap_expired_cache().await?;
        let fx_reaped = context.storage.reap_expired_fx_rates().await?;
        tracing::info!("reaped {} ledger rows, {} fx rows", reaped, fx_reaped);
    }

    let snapshot = context.storage.health_snapshot().await;
    let stats = context.cache.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "storage": snapshot,
            "cache": stats,
        }))?
    );

    context.close().await;
    Ok(())
}
