//! `serve` command: run the fabric until interrupted.

use anyhow::Result;
use clap::Args;
use tracing::info;

use stockline_common::{AppConfig, AppContext};

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Override the maintenance interval in seconds
    #[arg(long)]
    pub maintenance_interval: Option<u64>,
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let mut config = AppConfig::from_env()?;
    if let Some(interval) = args.maintenance_interval {
        config.maintenance_interval_secs = interval;
        config.validate()?;
    }

    let mut context = AppContext::init(config).await?;
    context.start_maintenance();
    info!("stockline serving; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining");
    context.close().await;
    Ok(())
}
