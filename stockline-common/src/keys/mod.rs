//! Cache-key and uniqueness-key derivation.
//!
//! Every tier of the fabric agrees on key construction through this module:
//! symbols are ASCII-uppercased, dates render as ISO-8601 (`YYYY-MM-DD`),
//! and parameter mappings serialize canonically so that structurally equal
//! parameter sets always produce byte-identical fingerprints.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data classes governed by per-class TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataClass {
    Ohlcv,
    Indicator,
    Fundamental,
    Fx,
    Analysis,
    Unknown,
}

impl DataClass {
    /// Storage form used in the cache-metadata table.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::Ohlcv => "OHLCV",
            DataClass::Indicator => "INDICATOR",
            DataClass::Fundamental => "FUNDAMENTAL",
            DataClass::Fx => "FX",
            DataClass::Analysis => "ANALYSIS",
            DataClass::Unknown => "UNKNOWN",
        }
    }

    /// Composite-key class segment (`"{class}:{symbol}:…"`).
    pub fn key_prefix(&self) -> &'static str {
        match self {
            DataClass::Ohlcv => "ohlcv",
            DataClass::Indicator => "indicators",
            DataClass::Fundamental => "fundamentals",
            DataClass::Fx => "fx",
            DataClass::Analysis => "analyze",
            DataClass::Unknown => "unknown",
        }
    }

    /// Parse the storage form; unrecognized strings degrade to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "OHLCV" => DataClass::Ohlcv,
            "INDICATOR" => DataClass::Indicator,
            "FUNDAMENTAL" => DataClass::Fundamental,
            "FX" => DataClass::Fx,
            "ANALYSIS" => DataClass::Analysis,
            _ => DataClass::Unknown,
        }
    }

    /// Default time-to-live for entries of this class.
    pub fn default_ttl(&self) -> Duration {
        match self {
            DataClass::Ohlcv => Duration::from_secs(15 * 60),
            DataClass::Indicator => Duration::from_secs(60 * 60),
            DataClass::Fundamental => Duration::from_secs(6 * 60 * 60),
            DataClass::Fx => Duration::from_secs(60 * 60),
            DataClass::Analysis => Duration::from_secs(60 * 60),
            DataClass::Unknown => Duration::from_secs(15 * 60),
        }
    }
}

impl std::fmt::Display for DataClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uppercase a ticker or currency code at the fabric boundary.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// Canonical fingerprint of a parameter mapping.
///
/// Rules: keys in lexicographic order (guaranteed by `BTreeMap`), numbers in
/// shortest round-trip form without insignificant trailing zeros, booleans as
/// `true`/`false`, no whitespace. Two mappings that compare equal produce
/// byte-identical output regardless of how they were assembled.
pub fn canonical_fingerprint(params: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(params.len() * 16 + 2);
    out.push('{');
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
        out.push(':');
        write_canonical_value(&mut out, value);
    }
    out.push('}');
    out
}

fn write_canonical_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else if let Some(f) = n.as_f64() {
                // `{}` on f64 is the shortest representation that round-trips,
                // which drops trailing zeros: 2.0 -> "2", 0.50 -> "0.5"
                out.push_str(&format!("{}", f));
            } else {
                out.push_str("null");
            }
        }
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("strings always serialize"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            out.push_str(&canonical_fingerprint(&sorted));
        }
    }
}

/// Composite key for an analysis response: `analyze:{SYMBOL}`.
pub fn analysis_key(symbol: &str) -> String {
    format!("analyze:{}", normalize_symbol(symbol))
}

/// Composite key for a date-ranged series:
/// `{class}:{SYMBOL}:{start}:{end}`.
pub fn series_key(class: DataClass, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{}:{}:{}:{}",
        class.key_prefix(),
        normalize_symbol(symbol),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
    )
}

/// Composite key for a parameterized indicator series:
/// `indicators:{SYMBOL}:{start}:{end}:{fingerprint}`.
pub fn indicator_key(
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    fingerprint: &str,
) -> String {
    format!(
        "{}:{}",
        series_key(DataClass::Indicator, symbol, start, end),
        fingerprint,
    )
}

/// Composite key for an FX pair: `fx:{FROM}:{TO}`.
pub fn fx_key(from: &str, to: &str) -> String {
    format!(
        "fx:{}:{}",
        normalize_symbol(from),
        normalize_symbol(to),
    )
}
