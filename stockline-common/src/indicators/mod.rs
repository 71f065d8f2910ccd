//! Indicator math the orchestrator delegates to.
//!
//! Plain functions over close-price slices; the fabric itself treats the
//! resulting values as opaque scalars keyed by symbol, type, date and
//! parameter fingerprint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::keys::canonical_fingerprint;
use crate::model::Signal;

/// Default SMA window used by the analysis response.
pub const SMA_PERIOD: usize = 50;
/// Default RSI lookback used by the analysis response.
pub const RSI_PERIOD: usize = 14;

/// Closed parameter configuration for indicator computation.
///
/// Every recognized option is declared here; the canonical fingerprint of
/// the set options keys the persisted rows, so structurally equal parameter
/// sets always collapse to the same row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    pub period: Option<u32>,
    pub fast_period: Option<u32>,
    pub slow_period: Option<u32>,
    pub signal_period: Option<u32>,
    pub std_dev: Option<f64>,
}

impl IndicatorParams {
    /// Single-period parameter set (SMA, RSI, and friends).
    pub fn period(period: u32) -> Self {
        Self {
            period: Some(period),
            ..Default::default()
        }
    }

    /// Canonical fingerprint of the options that are actually set.
    pub fn fingerprint(&self) -> String {
        let mut map = BTreeMap::new();
        if let Some(v) = self.period {
            map.insert("period".to_string(), json!(v));
        }
        if let Some(v) = self.fast_period {
            map.insert("fastPeriod".to_string(), json!(v));
        }
        if let Some(v) = self.slow_period {
            map.insert("slowPeriod".to_string(), json!(v));
        }
        if let Some(v) = self.signal_period {
            map.insert("signalPeriod".to_string(), json!(v));
        }
        if let Some(v) = self.std_dev {
            map.insert("stdDev".to_string(), json!(v));
        }
        canonical_fingerprint(&map)
    }
}

/// Arithmetic mean of the last `period` values. `None` until enough history.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Relative Strength Index with Wilder smoothing.
///
/// Needs `period + 1` values to produce the first reading: `period` price
/// changes seed the initial averages, later changes are smoothed in.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change >= 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in (period + 1)..values.len() {
        let change = values[i] - values[i - 1];
        let (gain, loss) = if change >= 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Deterministic signal from the computed indicators.
///
/// RSI extremes dominate; otherwise the price-versus-SMA trend decides.
/// Missing indicators fall back to `Hold`.
pub fn derive_signal(price: f64, sma: Option<f64>, rsi: Option<f64>) -> Signal {
    if let Some(rsi) = rsi {
        if rsi < 30.0 {
            return Signal::Buy;
        }
        if rsi > 70.0 {
            return Signal::Sell;
        }
    }
    match sma {
        Some(sma) if price > sma => Signal::Buy,
        Some(sma) if price < sma => Signal::Sell,
        _ => Signal::Hold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_requires_full_window() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&values, 5), None);
        assert_eq!(sma(&values, 4), Some(2.5));
        assert_eq!(sma(&values, 2), Some(3.5));
    }

    #[test]
    fn test_rsi_warmup_and_extremes() {
        // Monotonically rising prices: no losses, RSI pegs at 100
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        // Not enough history
        assert_eq!(rsi(&rising[..14], 14), None);
        assert!(rsi(&rising[..15], 14).is_some());
    }

    #[test]
    fn test_rsi_balanced_series_near_fifty() {
        // Alternating +1/-1: gains equal losses, RSI converges near 50
        let mut values = vec![100.0];
        for i in 0..30 {
            let last = *values.last().unwrap();
            values.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let value = rsi(&values, 14).unwrap();
        assert!((value - 50.0).abs() < 10.0, "rsi was {}", value);
    }

    #[test]
    fn test_signal_rules() {
        assert_eq!(derive_signal(100.0, Some(90.0), Some(25.0)), Signal::Buy);
        assert_eq!(derive_signal(100.0, Some(110.0), Some(75.0)), Signal::Sell);
        assert_eq!(derive_signal(100.0, Some(90.0), Some(50.0)), Signal::Buy);
        assert_eq!(derive_signal(100.0, Some(110.0), Some(50.0)), Signal::Sell);
        assert_eq!(derive_signal(100.0, None, None), Signal::Hold);
    }

    #[test]
    fn test_params_fingerprint_is_canonical() {
        let a = IndicatorParams::period(14);
        assert_eq!(a.fingerprint(), r#"{"period":14}"#);

        let b = IndicatorParams {
            std_dev: Some(2.0),
            period: Some(20),
            ..Default::default()
        };
        assert_eq!(b.fingerprint(), r#"{"period":20,"stdDev":2}"#);

        // Same options, different construction order: identical bytes
        let c = IndicatorParams {
            period: Some(20),
            std_dev: Some(2.0),
            ..Default::default()
        };
        assert_eq!(b.fingerprint(), c.fingerprint());
    }
}
