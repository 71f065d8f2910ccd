//! Deterministic market-data source for tests and keyless development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{FabricError, FabricResult};
use crate::keys::normalize_symbol;
use crate::model::{CorporateAction, RawBar};

use super::{MarketDataSource, UpstreamSeries};

/// Configurable in-memory source.
///
/// Without per-symbol overrides it generates a linear price ramp
/// (`base_price`, `base_price + 1`, …) over the requested window, one bar
/// per calendar day ending today. Latency and forced failures are tunable so
/// tests can observe coalescing and error propagation; every series fetch
/// bumps an invocation counter.
pub struct MockSource {
    /// First close of a generated ramp
    pub base_price: f64,
    /// Volume stamped on generated bars
    pub volume: i64,
    delay: Option<Duration>,
    series: RwLock<HashMap<String, Vec<RawBar>>>,
    actions: RwLock<HashMap<String, Vec<CorporateAction>>>,
    failure: RwLock<Option<FabricError>>,
    calls: AtomicU64,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            base_price: 100.0,
            volume: 10_000,
            delay: None,
            series: RwLock::new(HashMap::new()),
            actions: RwLock::new(HashMap::new()),
            failure: RwLock::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Sleep this long before answering each series fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Pin the bars returned for a symbol.
    pub fn set_series(&self, symbol: &str, bars: Vec<RawBar>) {
        self.series.write().insert(normalize_symbol(symbol), bars);
    }

    /// Pin the corporate actions returned for a symbol.
    pub fn set_actions(&self, symbol: &str, actions: Vec<CorporateAction>) {
        self.actions
            .write()
            .insert(normalize_symbol(symbol), actions);
    }

    /// Make every series fetch fail with this error.
    pub fn fail_with(&self, error: FabricError) {
        *self.failure.write() = Some(error);
    }

    /// Stop failing.
    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    /// Number of series fetches served (or attempted).
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn generate_ramp(&self, days: i64) -> Vec<RawBar> {
        let today = Utc::now().date_naive();
        let mut bars = Vec::with_capacity(days.max(0) as usize);
        for i in 0..days.max(0) {
            let offset = days - 1 - i;
            let close = self.base_price + i as f64;
            bars.push(RawBar::new(
                today - chrono::Duration::days(offset),
                close - 0.5,
                close + 1.0,
                close - 1.0,
                close,
                self.volume,
            ));
        }
        bars
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_daily_series(&self, symbol: &str, days: i64) -> FabricResult<UpstreamSeries> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.read().clone() {
            return Err(error);
        }

        let bars = self
            .series
            .read()
            .get(&normalize_symbol(symbol))
            .cloned()
            .unwrap_or_else(|| self.generate_ramp(days));

        Ok(UpstreamSeries {
            name: Some(format!("{} (mock)", normalize_symbol(symbol))),
            currency: Some("USD".to_string()),
            exchange: Some("MOCK".to_string()),
            bars,
        })
    }

    async fn fetch_corporate_actions(&self, symbol: &str) -> FabricResult<Vec<CorporateAction>> {
        Ok(self
            .actions
            .read()
            .get(&normalize_symbol(symbol))
            .cloned()
            .unwrap_or_default())
    }
}
