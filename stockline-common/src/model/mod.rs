//! Core entity types persisted and cached by the fabric.
//!
//! All timestamps are UTC. Monetary values are `f64` (REAL columns) with the
//! owning currency tracked alongside; deterministic rounding happens in the
//! normalization pipeline, not here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::DataClass;

// =================================================================
// Symbols
// =================================================================

/// A known instrument. `symbol` is the canonical uppercase ticker; `id` is a
/// surrogate key used for joins in the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
    /// Native trading currency, e.g. "USD"
    pub currency: String,
    pub exchange: Option<String>,
    pub isin: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata supplied when a symbol is first observed or enriched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub name: Option<String>,
    pub currency: Option<String>,
    pub exchange: Option<String>,
    pub isin: Option<String>,
}

impl SymbolMeta {
    /// Currency to persist when none was supplied.
    pub fn currency_or_default(&self) -> &str {
        self.currency.as_deref().unwrap_or("USD")
    }
}

/// Partial update of mutable symbol attributes. Fields left `None` are
/// untouched; an all-`None` patch is a no-op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolPatch {
    pub name: Option<String>,
    pub currency: Option<String>,
    pub exchange: Option<String>,
    pub isin: Option<String>,
}

impl SymbolPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.currency.is_none()
            && self.exchange.is_none()
            && self.isin.is_none()
    }
}

// =================================================================
// Bars
// =================================================================

/// One normalized OHLCV record for one symbol on one date.
///
/// Keyed by `(symbol_id, date)` in the store; re-insertion for the same key
/// replaces prior values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Unadjusted close as delivered by the source
    pub adjusted_close: f64,
    /// Split ratio applied to this bar during adjustment (1.0 when none)
    pub split_ratio: f64,
    /// Dividend amount associated with this bar's adjustment window (0.0 when none)
    pub dividend: f64,
    pub currency: String,
    pub data_source: String,
}

// =================================================================
// Fundamentals
// =================================================================

/// One fundamental metric observation, keyed by
/// `(symbol_id, metric_type, period_ending)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fundamental {
    pub metric_type: String,
    pub period_ending: NaiveDate,
    pub value: f64,
    pub currency: String,
    pub reported_at: Option<NaiveDate>,
    pub data_source: String,
}

// =================================================================
// Indicators
// =================================================================

/// One computed indicator value, keyed by
/// `(symbol_id, indicator_type, date, parameter_fingerprint)`.
///
/// The fingerprint is the canonical serialization of the parameter mapping
/// (see [`crate::keys::canonical_fingerprint`]) and doubles as the audit
/// record of the parameters the value was computed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub indicator_type: String,
    pub date: NaiveDate,
    pub value: f64,
    pub parameter_fingerprint: String,
}

// =================================================================
// FX
// =================================================================

/// Current exchange rate for an ordered currency pair. At most one active
/// row per pair; a pair is valid iff `expires_at > now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
    /// Rate exactly as quoted by the provider, before any local adjustment
    pub source_rate: f64,
    pub expires_at: DateTime<Utc>,
    pub data_source: String,
}

impl FxRate {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// One historical rate observation from the append-only history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRateSample {
    pub rate: f64,
    pub recorded_at: DateTime<Utc>,
    pub data_source: String,
}

// =================================================================
// Corporate actions
// =================================================================

/// Kind of corporate action affecting historical prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Split,
    Dividend,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Split => "SPLIT",
            ActionKind::Dividend => "DIVIDEND",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SPLIT" => Some(ActionKind::Split),
            "DIVIDEND" => Some(ActionKind::Dividend),
            _ => None,
        }
    }
}

/// A split or dividend event that retroactively adjusts history.
///
/// `adjustment_factor` is pre-computed at construction: the split ratio for
/// splits (prices before the action divide by it), 1.0 for dividends (price
/// space untouched).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub action_date: NaiveDate,
    pub kind: ActionKind,
    pub split_ratio: f64,
    pub dividend_amount: f64,
    pub adjustment_factor: f64,
}

impl CorporateAction {
    /// A split of `ratio`:1 (e.g. 4.0 for a 4:1 split) on `date`.
    pub fn split(date: NaiveDate, ratio: f64) -> Self {
        Self {
            action_date: date,
            kind: ActionKind::Split,
            split_ratio: ratio,
            dividend_amount: 0.0,
            adjustment_factor: ratio,
        }
    }

    /// A cash dividend of `amount` per share on `date`.
    pub fn dividend(date: NaiveDate, amount: f64) -> Self {
        Self {
            action_date: date,
            kind: ActionKind::Dividend,
            split_ratio: 1.0,
            dividend_amount: amount,
            adjustment_factor: 1.0,
        }
    }
}

// =================================================================
// Upstream (raw) bars
// =================================================================

/// A bar as delivered by an upstream source, before normalization.
///
/// Sources that only quote a closing price leave the other fields `None`;
/// the normalization pipeline either synthesizes them or rejects the bar,
/// depending on configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<i64>,
}

impl RawBar {
    /// Fully-specified raw bar.
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Self {
        Self {
            date,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close,
            volume: Some(volume),
        }
    }

    /// Close-only raw bar (quote sources without OHLC depth).
    pub fn close_only(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close,
            volume: None,
        }
    }
}

// =================================================================
// Cache metadata
// =================================================================

/// One row of the persistent freshness ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub cache_key: String,
    pub data_class: DataClass,
    pub expires_at: DateTime<Utc>,
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
}

// =================================================================
// Analysis results
// =================================================================

/// Trading signal derived from the computed indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Composite response assembled by the analysis orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub current_price: f64,
    pub currency: String,
    /// 50-period simple moving average of closes, when enough history exists
    pub sma_50: Option<f64>,
    /// 14-period relative strength index, when enough history exists
    pub rsi_14: Option<f64>,
    pub signal: Signal,
    /// Up to the last 50 bars, ascending by date
    pub historical: Vec<Bar>,
    pub as_of: DateTime<Utc>,
}

// =================================================================
// Health
// =================================================================

/// Row counts reported by the health snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub symbols: u64,
    pub bars: u64,
}

/// Point-in-time view of the persistent tier's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    /// "connected" or "error"
    pub connection: String,
    pub stats: StoreStats,
    /// Most recent upstream fetch recorded in the fetch log
    pub last_updated: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Degraded snapshot for an unreachable or uninitialized store.
    pub fn degraded(message: &str) -> Self {
        Self {
            healthy: false,
            connection: format!("error: {}", message),
            stats: StoreStats::default(),
            last_updated: None,
            timestamp: Utc::now(),
        }
    }
}
