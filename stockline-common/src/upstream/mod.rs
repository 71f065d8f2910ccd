//! Upstream market-data sources.
//!
//! The fabric consumes a minimal capability set: a daily bar series with
//! symbol metadata, and the symbol's corporate actions. Concrete provider
//! protocols live behind [`MarketDataSource`]; the repo ships one thin live
//! implementation and a deterministic mock.

mod alpha;
mod mock;

pub use alpha::AlphaDailySource;
pub use mock::MockSource;

use async_trait::async_trait;

use crate::error::FabricResult;
use crate::model::{CorporateAction, RawBar};

/// A daily series as delivered by an upstream source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamSeries {
    /// Display name when the source knows it
    pub name: Option<String>,
    /// Native currency when the source knows it
    pub currency: Option<String>,
    /// Listing exchange when the source knows it
    pub exchange: Option<String>,
    /// Raw bars, unordered and unadjusted
    pub bars: Vec<RawBar>,
}

/// Minimal capability set the fabric requires from a market-data provider.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Short identifier recorded in the fetch log and on stored bars.
    fn name(&self) -> &str;

    /// Daily bars covering roughly the last `days` calendar days.
    async fn fetch_daily_series(&self, symbol: &str, days: i64) -> FabricResult<UpstreamSeries>;

    /// Known splits and dividends for the symbol.
    async fn fetch_corporate_actions(&self, symbol: &str) -> FabricResult<Vec<CorporateAction>>;
}
