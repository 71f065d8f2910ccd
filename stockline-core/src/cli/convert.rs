//! `convert` command: currency conversion through the FX subsystem.

use anyhow::Result;
use clap::Args;

use stockline_common::{AppConfig, AppContext};

/// Arguments for the convert command
#[derive(Args)]
pub struct ConvertArgs {
    /// Source currency code, e.g. USD
    pub from: String,

    /// Target currency code, e.g. CAD
    pub to: String,

    /// Amount in the source currency
    pub amount: f64,
}

pub async fn execute(args: ConvertArgs) -> Result<()> {
    let config = AppConfig::from_env()?;
    let context = AppContext::init(config).await?;

    let Some(fx) = context.fx.as_ref() else {
        anyhow::bail!("fx subsystem is disabled (set FX_ENABLED=true)");
    };

    let converted = fx.convert(&args.from, &args.to, args.amount).await?;
    println!(
        "{}",
        serde_json::json!({
            "from": args.from.to_uppercase(),
            "to": args.to.to_uppercase(),
            "amount": args.amount,
            "converted": converted,
        })
    );

    context.close().await;
    Ok(())
}
