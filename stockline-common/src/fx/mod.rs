//! Currency conversion subsystem.
//!
//! Rate acquisition order: same-currency short-circuit, cached direct rate,
//! cached inverse rate (reused as `1 / rate` whether or not a stale direct
//! row exists), then the provider failover chain. Fresh rates are written
//! through with a one-hour expiry and appended to the history table.

pub mod providers;

pub use providers::{default_provider_chain, ExchangeRateApi, FixerApi, FxProvider, OpenErApi};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{FabricError, FabricResult};
use crate::model::{FxRate, FxRateSample};
use crate::storage::StorageBackend;
use crate::validation::validate_currency_code;

/// Freshness window for a provider-sourced rate, in seconds.
const RATE_TTL_SECS: i64 = 60 * 60;

/// One conversion request in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertRequest {
    pub from: String,
    pub to: String,
    pub amount: f64,
}

/// Per-request outcome of a batch conversion.
#[derive(Debug)]
pub struct ConvertOutcome {
    pub request: ConvertRequest,
    pub result: FabricResult<f64>,
}

/// Resilient FX rate lookup and conversion.
pub struct FxService {
    storage: Arc<dyn StorageBackend>,
    providers: Vec<Box<dyn FxProvider>>,
}

impl FxService {
    pub fn new(storage: Arc<dyn StorageBackend>, providers: Vec<Box<dyn FxProvider>>) -> Self {
        Self { storage, providers }
    }

    /// Rate for one unit of `from` in `to`, or `None` when neither the cache
    /// nor any provider can supply one. Only storage failures error.
    pub async fn try_rate(&self, from: &str, to: &str) -> FabricResult<Option<f64>> {
        let from = validate_currency_code(from).map_err(FabricError::from)?;
        let to = validate_currency_code(to).map_err(FabricError::from)?;

        if from == to {
            return Ok(Some(1.0));
        }

        if let Some(cached) = self.storage.get_fx_rate(&from, &to).await? {
            debug!("fx cache hit {}->{}", from, to);
            return Ok(Some(cached.rate));
        }

        if let Some(inverse) = self.storage.get_fx_rate(&to, &from).await? {
            debug!("fx inversion reuse {}->{} from {}->{}", from, to, to, from);
            return Ok(Some(1.0 / inverse.rate));
        }

        for provider in &self.providers {
            match provider.fetch_rate(&from, &to).await {
                Ok(rate) => {
                    info!("fx rate {}->{} = {} via {}", from, to, rate, provider.name());
                    let row = FxRate {
                        from_currency: from.clone(),
                        to_currency: to.clone(),
                        rate,
                        source_rate: rate,
                        expires_at: Utc::now() + chrono::Duration::seconds(RATE_TTL_SECS),
                        data_source: provider.name().to_string(),
                    };
                    self.storage.upsert_fx_rate(&row).await?;
                    return Ok(Some(rate));
                }
                Err(e) => {
                    warn!("fx provider {} failed for {}->{}: {}", provider.name(), from, to, e);
                }
            }
        }

        Ok(None)
    }

    /// Rate for one unit of `from` in `to`; errors when unobtainable.
    pub async fn rate(&self, from: &str, to: &str) -> FabricResult<f64> {
        self.try_rate(from, to).await?.ok_or_else(|| {
            FabricError::FxUnavailable(format!("{}->{}", from, to))
        })
    }

    /// Convert `amount` of `from` into `to`.
    pub async fn convert(&self, from: &str, to: &str, amount: f64) -> FabricResult<f64> {
        let rate = self.rate(from, to).await?;
        Ok(amount * rate)
    }

    /// Convert a batch; one failure does not abort the others.
    pub async fn batch_convert(&self, requests: &[ConvertRequest]) -> Vec<ConvertOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let result = self
                .convert(&request.from, &request.to, request.amount)
                .await;
            outcomes.push(ConvertOutcome {
                request: request.clone(),
                result,
            });
        }
        outcomes
    }

    /// All stored rate observations for the pair inside the window.
    pub async fn rate_history(
        &self,
        from: &str,
        to: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FabricResult<Vec<FxRateSample>> {
        let from = validate_currency_code(from).map_err(FabricError::from)?;
        let to = validate_currency_code(to).map_err(FabricError::from)?;
        self.storage.fx_rate_history(&from, &to, start, end).await
    }

    /// Arithmetic mean over the window, or `None` when it is empty.
    pub async fn average_rate(
        &self,
        from: &str,
        to: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FabricResult<Option<f64>> {
        let samples = self.rate_history(from, to, start, end).await?;
        if samples.is_empty() {
            return Ok(None);
        }
        let sum: f64 = samples.iter().map(|s| s.rate).sum();
        Ok(Some(sum / samples.len() as f64))
    }
}
