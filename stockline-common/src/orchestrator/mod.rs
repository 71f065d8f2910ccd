//! Analysis orchestrator: the core-facing façade over the cache fabric.
//!
//! `analyze` resolves a symbol's composite analysis through the tiers:
//! cached response, fresh entity data in storage, and finally an upstream
//! fetch through the normalization pipeline. Concurrent misses on the same
//! symbol coalesce into a single populator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, CacheOutcome, SingleFlight};
use crate::error::{retry_once, FabricError, FabricResult};
use crate::indicators::{derive_signal, rsi, sma, IndicatorParams, RSI_PERIOD, SMA_PERIOD};
use crate::keys::{analysis_key, series_key, DataClass};
use crate::model::{AnalysisResult, Bar, IndicatorValue, SymbolMeta};
use crate::normalize::normalize_bars;
use crate::storage::StorageBackend;
use crate::upstream::MarketDataSource;
use crate::validation::SymbolValidator;

/// Tunables for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// TTL of the composite analysis entry
    pub analysis_ttl: Duration,
    /// SMA window; also the storage-sufficiency threshold
    pub sma_period: usize,
    /// RSI lookback
    pub rsi_period: usize,
    /// Bars included in the response tail
    pub historical_len: usize,
    /// Synthesize open/high/low for close-only upstream bars
    pub synthesize_ohlc: bool,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            analysis_ttl: DataClass::Analysis.default_ttl(),
            sma_period: SMA_PERIOD,
            rsi_period: RSI_PERIOD,
            historical_len: 50,
            synthesize_ohlc: true,
        }
    }
}

/// Core-facing analysis façade.
pub struct Analyzer {
    storage: Arc<dyn StorageBackend>,
    cache: Arc<CacheManager>,
    upstream: Arc<dyn MarketDataSource>,
    flights: SingleFlight<AnalysisResult>,
    validator: SymbolValidator,
    settings: AnalyzerSettings,
}

impl Analyzer {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        cache: Arc<CacheManager>,
        upstream: Arc<dyn MarketDataSource>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            storage,
            cache,
            upstream,
            flights: SingleFlight::new(),
            validator: SymbolValidator::new(),
            settings,
        }
    }

    /// Produce the composite analysis for `symbol` over the trailing
    /// `range_days` calendar days.
    pub async fn analyze(&self, symbol: &str, range_days: i64) -> FabricResult<AnalysisResult> {
        if range_days <= 0 {
            return Err(FabricError::validation(format!(
                "range must be positive, got {}",
                range_days
            )));
        }
        let symbol = self.validator.normalize(symbol)?;
        let key = analysis_key(&symbol);

        match self.cache.get(&key).await? {
            CacheOutcome::Hit(raw) => match serde_json::from_str::<AnalysisResult>(&raw) {
                Ok(result) => return Ok(result),
                Err(e) => warn!("discarding undecodable cache entry {}: {}", key, e),
            },
            // Fresh means the entity tables are vouched for; the populate
            // path below reconstructs from them without touching upstream.
            CacheOutcome::Fresh | CacheOutcome::Miss => {}
        }

        self.flights
            .run(&key, || self.populate(&symbol, range_days, &key))
            .await
    }

    /// Date-ranged daily bars through the cache fabric.
    ///
    /// Serves from the value tiers when possible, otherwise reads storage
    /// and writes through with the OHLCV TTL. Never invokes upstream; an
    /// empty range is an empty answer, not an error.
    pub async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FabricResult<Vec<Bar>> {
        if start > end {
            return Err(FabricError::validation(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        let symbol = self.validator.normalize(symbol)?;
        let key = series_key(DataClass::Ohlcv, &symbol, start, end);

        if let CacheOutcome::Hit(raw) = self.cache.get(&key).await? {
            match serde_json::from_str::<Vec<Bar>>(&raw) {
                Ok(bars) => return Ok(bars),
                Err(e) => warn!("discarding undecodable cache entry {}: {}", key, e),
            }
        }

        let bars = retry_once(|| self.storage.get_bars(&symbol, start, end)).await?;
        if !bars.is_empty() {
            self.cache
                .set_json(&key, &bars, DataClass::Ohlcv.default_ttl(), DataClass::Ohlcv)
                .await?;
        }
        Ok(bars)
    }

    async fn populate(
        &self,
        symbol: &str,
        range_days: i64,
        key: &str,
    ) -> FabricResult<AnalysisResult> {
        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(range_days);

        let stored = retry_once(|| self.storage.get_bars(symbol, start, end)).await?;
        let bars = if stored.len() >= self.settings.sma_period {
            debug!("serving {} from {} stored bars", symbol, stored.len());
            stored
        } else {
            self.refresh_from_upstream(symbol, range_days).await?
        };

        let Some(last_bar) = bars.last() else {
            return Err(FabricError::not_found(format!(
                "no price data available for {}",
                symbol
            )));
        };
        let current_price = last_bar.close;
        let currency = last_bar.currency.clone();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let sma_50 = sma(&closes, self.settings.sma_period);
        let rsi_14 = rsi(&closes, self.settings.rsi_period);
        self.persist_indicators(symbol, &bars, sma_50, rsi_14).await?;

        let tail_start = bars.len().saturating_sub(self.settings.historical_len);
        let result = AnalysisResult {
            symbol: symbol.to_string(),
            current_price,
            currency,
            sma_50,
            rsi_14,
            signal: derive_signal(current_price, sma_50, rsi_14),
            historical: bars[tail_start..].to_vec(),
            as_of: Utc::now(),
        };

        self.cache
            .set_json(key, &result, self.settings.analysis_ttl, DataClass::Analysis)
            .await?;
        Ok(result)
    }

    /// One fallback pass to upstream: fetch, normalize, persist.
    async fn refresh_from_upstream(&self, symbol: &str, range_days: i64) -> FabricResult<Vec<Bar>> {
        let series = match self.upstream.fetch_daily_series(symbol, range_days).await {
            Ok(series) => series,
            Err(e) => {
                warn!("upstream fetch failed for {}: {}", symbol, e);
                return Err(FabricError::not_found(format!(
                    "data unavailable for {}: {}",
                    symbol, e
                )));
            }
        };
        if series.bars.is_empty() {
            return Err(FabricError::not_found(format!(
                "upstream returned no bars for {}",
                symbol
            )));
        }

        let actions = match self.storage.get_corporate_actions(symbol).await {
            Ok(stored) if !stored.is_empty() => stored,
            _ => match self.upstream.fetch_corporate_actions(symbol).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("corporate action fetch failed for {}: {}", symbol, e);
                    Vec::new()
                }
            },
        };

        let currency = series.currency.clone().unwrap_or_else(|| "USD".to_string());
        let bars = normalize_bars(
            &series.bars,
            &actions,
            &currency,
            self.upstream.name(),
            self.settings.synthesize_ohlc,
        )?;

        let meta = SymbolMeta {
            name: series.name.clone(),
            currency: series.currency.clone(),
            exchange: series.exchange.clone(),
            isin: None,
        };
        self.storage.upsert_symbol(symbol, &meta).await?;
        self.storage.upsert_bars(symbol, &bars).await?;
        if !actions.is_empty() {
            self.storage.upsert_corporate_actions(symbol, &actions).await?;
        }
        self.storage
            .record_fetch(symbol, self.upstream.name(), bars.len() as u64)
            .await?;

        info!(
            "refreshed {} from {}: {} bars",
            symbol,
            self.upstream.name(),
            bars.len()
        );
        Ok(bars)
    }

    async fn persist_indicators(
        &self,
        symbol: &str,
        bars: &[Bar],
        sma_50: Option<f64>,
        rsi_14: Option<f64>,
    ) -> FabricResult<()> {
        let Some(last) = bars.last() else {
            return Ok(());
        };

        let mut rows = Vec::with_capacity(2);
        if let Some(value) = sma_50 {
            rows.push(IndicatorValue {
                indicator_type: "SMA".to_string(),
                date: last.date,
                value,
                parameter_fingerprint: IndicatorParams::period(self.settings.sma_period as u32)
                    .fingerprint(),
            });
        }
        if let Some(value) = rsi_14 {
            rows.push(IndicatorValue {
                indicator_type: "RSI".to_string(),
                date: last.date,
                value,
                parameter_fingerprint: IndicatorParams::period(self.settings.rsi_period as u32)
                    .fingerprint(),
            });
        }
        if rows.is_empty() {
            return Ok(());
        }
        self.storage.upsert_indicators(symbol, &rows).await?;
        Ok(())
    }
}
