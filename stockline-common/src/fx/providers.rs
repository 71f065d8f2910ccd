//! FX rate providers.
//!
//! Three upstream shapes behind one trait, tried in declared order by the
//! service: a keyed pair endpoint, a keyless base endpoint, and a keyed
//! base+symbols endpoint. Every request carries the configured timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{FabricError, FabricResult};

/// One upstream source of spot exchange rates.
#[async_trait]
pub trait FxProvider: Send + Sync {
    /// Short identifier recorded as the rate's `data_source`.
    fn name(&self) -> &str;

    /// Spot rate for one unit of `from` in `to`.
    async fn fetch_rate(&self, from: &str, to: &str) -> FabricResult<f64>;
}

fn build_client(timeout: Duration) -> FabricResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FabricError::Config(format!("failed to build http client: {}", e)))
}

// =================================================================
// Provider A: keyed pair endpoint (exchangerate-api.com shape)
// =================================================================

#[derive(Debug, Deserialize)]
struct PairResponse {
    result: Option<String>,
    conversion_rate: Option<f64>,
}

/// `GET {base}/v6/{key}/pair/{FROM}/{TO}`
pub struct ExchangeRateApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ExchangeRateApi {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> FabricResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.into(),
            base_url: "https://v6.exchangerate-api.com".to_string(),
        })
    }

    /// Point at a different host (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl FxProvider for ExchangeRateApi {
    fn name(&self) -> &str {
        "exchangerate-api"
    }

    async fn fetch_rate(&self, from: &str, to: &str) -> FabricResult<f64> {
        let url = format!("{}/v6/{}/pair/{}/{}", self.base_url, self.api_key, from, to);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(FabricError::UpstreamUnavailable(format!(
                "{} returned status {}",
                self.name(),
                response.status()
            )));
        }

        let body: PairResponse = response.json().await?;
        if body.result.as_deref() != Some("success") {
            return Err(FabricError::UpstreamUnavailable(format!(
                "{} reported failure for {}/{}",
                self.name(),
                from,
                to
            )));
        }
        body.conversion_rate.ok_or_else(|| {
            FabricError::UpstreamUnavailable(format!(
                "{} response missing conversion rate",
                self.name()
            ))
        })
    }
}

// =================================================================
// Provider B: keyless base endpoint (open.er-api.com shape)
// =================================================================

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    result: Option<String>,
    rates: Option<HashMap<String, f64>>,
}

/// `GET {base}/v6/latest/{FROM}`, rate picked out of the table.
pub struct OpenErApi {
    client: reqwest::Client,
    base_url: String,
}

impl OpenErApi {
    pub fn new(timeout: Duration) -> FabricResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: "https://open.er-api.com".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl FxProvider for OpenErApi {
    fn name(&self) -> &str {
        "open-er-api"
    }

    async fn fetch_rate(&self, from: &str, to: &str) -> FabricResult<f64> {
        let url = format!("{}/v6/latest/{}", self.base_url, from);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(FabricError::UpstreamUnavailable(format!(
                "{} returned status {}",
                self.name(),
                response.status()
            )));
        }

        let body: LatestRatesResponse = response.json().await?;
        if body.result.as_deref() != Some("success") {
            return Err(FabricError::UpstreamUnavailable(format!(
                "{} reported failure for base {}",
                self.name(),
                from
            )));
        }
        body.rates
            .as_ref()
            .and_then(|rates| rates.get(to).copied())
            .ok_or_else(|| {
                FabricError::UpstreamUnavailable(format!(
                    "{} has no rate for {} in base {}",
                    self.name(),
                    to,
                    from
                ))
            })
    }
}

// =================================================================
// Provider C: keyed base+symbols endpoint (fixer.io shape)
// =================================================================

#[derive(Debug, Deserialize)]
struct FixerResponse {
    success: Option<bool>,
    rates: Option<HashMap<String, f64>>,
}

/// `GET {base}/api/latest?access_key={key}&base={FROM}&symbols={TO}`
pub struct FixerApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FixerApi {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> FabricResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.into(),
            base_url: "https://data.fixer.io".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl FxProvider for FixerApi {
    fn name(&self) -> &str {
        "fixer"
    }

    async fn fetch_rate(&self, from: &str, to: &str) -> FabricResult<f64> {
        let url = format!(
            "{}/api/latest?access_key={}&base={}&symbols={}",
            self.base_url, self.api_key, from, to
        );
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(FabricError::UpstreamUnavailable(format!(
                "{} returned status {}",
                self.name(),
                response.status()
            )));
        }

        let body: FixerResponse = response.json().await?;
        if body.success != Some(true) {
            return Err(FabricError::UpstreamUnavailable(format!(
                "{} reported failure for {}/{}",
                self.name(),
                from,
                to
            )));
        }
        body.rates
            .as_ref()
            .and_then(|rates| rates.get(to).copied())
            .ok_or_else(|| {
                FabricError::UpstreamUnavailable(format!(
                    "{} has no rate for {} in base {}",
                    self.name(),
                    to,
                    from
                ))
            })
    }
}

/// The declared failover chain: keyed pair endpoint first when a key is
/// available, then the keyless fallback, then the keyed base endpoint.
pub fn default_provider_chain(
    api_key: Option<&str>,
    timeout: Duration,
) -> FabricResult<Vec<Box<dyn FxProvider>>> {
    let mut providers: Vec<Box<dyn FxProvider>> = Vec::new();
    if let Some(key) = api_key {
        providers.push(Box::new(ExchangeRateApi::new(key, timeout)?));
    }
    providers.push(Box::new(OpenErApi::new(timeout)?));
    if let Some(key) = api_key {
        providers.push(Box::new(FixerApi::new(key, timeout)?));
    }
    debug!("fx provider chain: {} providers", providers.len());
    Ok(providers)
}
