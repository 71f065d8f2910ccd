//! Corporate-action normalization pipeline.
//!
//! Converts raw upstream bars into the canonical, adjustment-consistent form
//! the store persists. Adjustment is backward: a bar is divided by the
//! compounded split ratio of every action dated strictly after it, and its
//! volume multiplied by the same ratio, so the whole series reads in the
//! most recent price scale. Dividends never move prices (factor 1.0) and
//! never scale volume.
//!
//! The pipeline is deterministic: the same raw input and action set always
//! produce byte-identical output, and it never reads `adjusted_close` from
//! its input, so re-running it re-writes identical rows.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

use crate::error::{FabricError, FabricResult};
use crate::model::{Bar, CorporateAction, RawBar};

/// Default volume assigned to synthesized bars.
const SYNTHETIC_VOLUME: i64 = 1_000_000;

/// Round to four decimals, half away from zero.
pub fn round4(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Normalize a batch of raw bars against a symbol's corporate actions.
///
/// The batch either normalizes completely or fails with `DataQuality`;
/// validation warnings are logged but do not reject the batch. Bars are
/// returned ascending by date.
pub fn normalize_bars(
    raw: &[RawBar],
    actions: &[CorporateAction],
    currency: &str,
    data_source: &str,
    synthesize_missing_ohlc: bool,
) -> FabricResult<Vec<Bar>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut bars: Vec<RawBar> = raw.to_vec();
    bars.sort_by_key(|b| b.date);

    let mut sorted_actions: Vec<CorporateAction> = actions.to_vec();
    sorted_actions.sort_by_key(|a| a.action_date);

    // Compounded split ratio of actions[i..]; suffix[len] is the identity
    let mut suffix_factor = vec![1.0_f64; sorted_actions.len() + 1];
    for (i, action) in sorted_actions.iter().enumerate().rev() {
        suffix_factor[i] = suffix_factor[i + 1] * action.adjustment_factor;
    }

    let mut errors: Vec<String> = Vec::new();
    let mut normalized = Vec::with_capacity(bars.len());

    // Monotone pointer to the first action dated after the current bar
    let mut next_action = 0usize;

    for bar in &bars {
        while next_action < sorted_actions.len()
            && sorted_actions[next_action].action_date <= bar.date
        {
            next_action += 1;
        }
        let factor = suffix_factor[next_action];
        let nearest_later = sorted_actions.get(next_action);

        let (open, high, low, volume) = match resolve_ohlc(bar, synthesize_missing_ohlc) {
            Ok(fields) => fields,
            Err(message) => {
                errors.push(message);
                continue;
            }
        };

        let bar = Bar {
            date: bar.date,
            open: round4(open / factor),
            high: round4(high / factor),
            low: round4(low / factor),
            close: round4(bar.close / factor),
            volume: ((volume as f64) * factor).floor() as i64,
            adjusted_close: round4(bar.close),
            split_ratio: nearest_later.map(|a| a.split_ratio).unwrap_or(1.0),
            dividend: nearest_later.map(|a| a.dividend_amount).unwrap_or(0.0),
            currency: currency.to_string(),
            data_source: data_source.to_string(),
        };

        if let Err(message) = validate_bar(&bar) {
            errors.push(message);
            continue;
        }
        normalized.push(bar);
    }

    if !errors.is_empty() {
        return Err(FabricError::DataQuality(format!(
            "{} of {} bars rejected: {}",
            errors.len(),
            bars.len(),
            errors.join("; "),
        )));
    }
    Ok(normalized)
}

fn resolve_ohlc(bar: &RawBar, synthesize: bool) -> Result<(f64, f64, f64, i64), String> {
    match (bar.open, bar.high, bar.low) {
        (Some(open), Some(high), Some(low)) => {
            Ok((open, high, low, bar.volume.unwrap_or(SYNTHETIC_VOLUME)))
        }
        _ if synthesize => Ok((
            bar.close * 0.995,
            bar.close * 1.01,
            bar.close * 0.99,
            bar.volume.unwrap_or(SYNTHETIC_VOLUME),
        )),
        _ => Err(format!(
            "bar {} is missing open/high/low and synthesis is disabled",
            bar.date
        )),
    }
}

fn validate_bar(bar: &Bar) -> Result<(), String> {
    if bar.low > bar.high {
        return Err(format!(
            "bar {}: low {} exceeds high {}",
            bar.date, bar.low, bar.high
        ));
    }
    if bar.open < 0.0 || bar.high < 0.0 || bar.low < 0.0 {
        return Err(format!("bar {}: negative price", bar.date));
    }
    if bar.close <= 0.0 {
        return Err(format!("bar {}: close {} must be positive", bar.date, bar.close));
    }
    if bar.volume < 0 {
        return Err(format!("bar {}: negative volume {}", bar.date, bar.volume));
    }
    if bar.split_ratio <= 0.0 {
        return Err(format!(
            "bar {}: split ratio {} must be positive",
            bar.date, bar.split_ratio
        ));
    }
    if bar.close < bar.low || bar.close > bar.high {
        warn!(
            "bar {}: close {} outside range [{}, {}]",
            bar.date, bar.close, bar.low, bar.high
        );
    }
    Ok(())
}
