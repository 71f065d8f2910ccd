//! Daily-adjusted series source (Alpha Vantage wire shape).
//!
//! One endpoint supplies everything the fabric consumes: daily OHLCV plus
//! per-day split coefficients and dividend amounts, from which corporate
//! actions are derived.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{FabricError, FabricResult};
use crate::keys::normalize_symbol;
use crate::model::{CorporateAction, RawBar};

use super::{MarketDataSource, UpstreamSeries};

#[derive(Debug, Deserialize)]
struct DailyAdjustedResponse {
    #[serde(rename = "Meta Data")]
    meta: Option<DailyMeta>,
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyRow>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyMeta {
    #[serde(rename = "2. Symbol")]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyRow {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "6. volume")]
    volume: String,
    #[serde(rename = "7. dividend amount")]
    dividend_amount: Option<String>,
    #[serde(rename = "8. split coefficient")]
    split_coefficient: Option<String>,
}

/// Live daily-series provider, selected when a market-data API key is set.
pub struct AlphaDailySource {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AlphaDailySource {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> FabricResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FabricError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: "https://www.alphavantage.co".to_string(),
        })
    }

    /// Point at a different host (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_payload(&self, symbol: &str) -> FabricResult<DailyAdjustedResponse> {
        let url = format!(
            "{}/query?function=TIME_SERIES_DAILY_ADJUSTED&symbol={}&outputsize=compact&apikey={}",
            self.base_url,
            normalize_symbol(symbol),
            self.api_key
        );
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(FabricError::UpstreamUnavailable(format!(
                "daily series endpoint returned status {}",
                response.status()
            )));
        }

        let payload: DailyAdjustedResponse = response.json().await?;
        if let Some(message) = &payload.error_message {
            return Err(FabricError::not_found(format!(
                "upstream rejected symbol {}: {}",
                normalize_symbol(symbol),
                message
            )));
        }
        if let Some(note) = &payload.note {
            return Err(FabricError::UpstreamUnavailable(format!(
                "upstream throttled: {}",
                note
            )));
        }
        Ok(payload)
    }
}

fn parse_field(value: &str, field: &str, date: &str) -> FabricResult<f64> {
    value.parse::<f64>().map_err(|_| {
        FabricError::UpstreamUnavailable(format!("unparseable {} '{}' on {}", field, value, date))
    })
}

#[async_trait]
impl MarketDataSource for AlphaDailySource {
    fn name(&self) -> &str {
        "alphavantage"
    }

    async fn fetch_daily_series(&self, symbol: &str, days: i64) -> FabricResult<UpstreamSeries> {
        let payload = self.fetch_payload(symbol).await?;
        let Some(series) = payload.series else {
            return Err(FabricError::not_found(format!(
                "no daily series for {}",
                normalize_symbol(symbol)
            )));
        };

        // BTreeMap keys are ISO dates, so iteration is already ascending;
        // keep the trailing `days` entries
        let mut bars = Vec::with_capacity(series.len());
        for (raw_date, row) in &series {
            let Ok(date) = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d") else {
                warn!("skipping unparseable series date {}", raw_date);
                continue;
            };
            bars.push(RawBar {
                date,
                open: Some(parse_field(&row.open, "open", raw_date)?),
                high: Some(parse_field(&row.high, "high", raw_date)?),
                low: Some(parse_field(&row.low, "low", raw_date)?),
                close: parse_field(&row.close, "close", raw_date)?,
                volume: row.volume.parse::<i64>().ok(),
            });
        }
        let keep = days.max(0) as usize;
        if bars.len() > keep {
            bars = bars.split_off(bars.len() - keep);
        }

        debug!(
            "fetched {} daily bars for {}",
            bars.len(),
            normalize_symbol(symbol)
        );
        Ok(UpstreamSeries {
            name: payload.meta.and_then(|m| m.symbol),
            currency: None,
            exchange: None,
            bars,
        })
    }

    async fn fetch_corporate_actions(&self, symbol: &str) -> FabricResult<Vec<CorporateAction>> {
        let payload = self.fetch_payload(symbol).await?;
        let Some(series) = payload.series else {
            return Ok(Vec::new());
        };

        let mut actions = Vec::new();
        for (raw_date, row) in &series {
            let Ok(date) = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d") else {
                continue;
            };
            if let Some(raw) = &row.split_coefficient {
                if let Ok(ratio) = raw.parse::<f64>() {
                    if (ratio - 1.0).abs() > f64::EPSILON && ratio > 0.0 {
                        actions.push(CorporateAction::split(date, ratio));
                    }
                }
            }
            if let Some(raw) = &row.dividend_amount {
                if let Ok(amount) = raw.parse::<f64>() {
                    if amount > 0.0 {
                        actions.push(CorporateAction::dividend(date, amount));
                    }
                }
            }
        }
        Ok(actions)
    }
}
