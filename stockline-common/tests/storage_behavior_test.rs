//! Storage contract tests against the embedded backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tempfile::TempDir;

use stockline_common::keys::DataClass;
use stockline_common::model::{Bar, Fundamental, FxRate, IndicatorValue, SymbolMeta, SymbolPatch};
use stockline_common::storage::{SqliteBackend, StorageBackend};
use stockline_common::FabricError;

async fn test_backend() -> (TempDir, Arc<dyn StorageBackend>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let backend = SqliteBackend::connect(&url).await.expect("connect sqlite");
    (dir, Arc::new(backend))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn bar(d: NaiveDate, close: f64, volume: i64) -> Bar {
    Bar {
        date: d,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume,
        adjusted_close: close,
        split_ratio: 1.0,
        dividend: 0.0,
        currency: "USD".to_string(),
        data_source: "test".to_string(),
    }
}

#[tokio::test]
async fn test_symbol_matching_is_case_insensitive() {
    let (_dir, store) = test_backend().await;

    store
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();
    store
        .upsert_bars("AAPL", &[bar(date(2024, 6, 3), 195.0, 1_000)])
        .await
        .unwrap();

    let lower = store
        .get_bars("aapl", date(2024, 1, 1), date(2024, 12, 31))
        .await
        .unwrap();
    let upper = store
        .get_bars("AAPL", date(2024, 1, 1), date(2024, 12, 31))
        .await
        .unwrap();
    assert_eq!(lower, upper);
    assert_eq!(lower.len(), 1);

    // Lowercase upsert resolves to the same row, not a second symbol
    let record = store
        .upsert_symbol("aapl", &SymbolMeta::default())
        .await
        .unwrap();
    assert_eq!(record.symbol, "AAPL");
}

#[tokio::test]
async fn test_upsert_symbol_preserves_created_at_and_bumps_updated_at() {
    let (_dir, store) = test_backend().await;

    let first = store
        .upsert_symbol("MSFT", &SymbolMeta::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let meta = SymbolMeta {
        name: Some("Microsoft Corporation".to_string()),
        ..Default::default()
    };
    let second = store.upsert_symbol("MSFT", &meta).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.name.as_deref(), Some("Microsoft Corporation"));
    // Enrichment with an empty meta does not erase prior values
    let third = store
        .upsert_symbol("MSFT", &SymbolMeta::default())
        .await
        .unwrap();
    assert_eq!(third.name.as_deref(), Some("Microsoft Corporation"));
}

#[tokio::test]
async fn test_update_symbol_partial_and_not_found() {
    let (_dir, store) = test_backend().await;

    // Empty patch on an unknown symbol is a no-op, not an error
    store
        .update_symbol("GHOST", &SymbolPatch::default())
        .await
        .unwrap();

    let patch = SymbolPatch {
        exchange: Some("NASDAQ".to_string()),
        ..Default::default()
    };
    let err = store.update_symbol("GHOST", &patch).await.unwrap_err();
    assert!(matches!(err, FabricError::NotFound(_)));

    store
        .upsert_symbol("NVDA", &SymbolMeta::default())
        .await
        .unwrap();
    store.update_symbol("NVDA", &patch).await.unwrap();
    let record = store.get_symbol("nvda").await.unwrap().unwrap();
    assert_eq!(record.exchange.as_deref(), Some("NASDAQ"));
    assert_eq!(record.currency, "USD");
}

#[tokio::test]
async fn test_bar_upsert_replaces_at_same_key() {
    let (_dir, store) = test_backend().await;
    store
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();

    let day = date(2024, 6, 3);
    store.upsert_bars("AAPL", &[bar(day, 195.0, 1_000)]).await.unwrap();
    store.upsert_bars("AAPL", &[bar(day, 196.5, 2_000)]).await.unwrap();

    let bars = store.get_bars("AAPL", day, day).await.unwrap();
    assert_eq!(bars.len(), 1, "second upsert must replace, not duplicate");
    assert_eq!(bars[0].close, 196.5);
    assert_eq!(bars[0].volume, 2_000);
}

#[tokio::test]
async fn test_bars_roundtrip_ascending() {
    let (_dir, store) = test_backend().await;
    store
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();

    // Insert out of order; reads come back ascending
    let input = vec![
        bar(date(2024, 6, 5), 197.0, 300),
        bar(date(2024, 6, 3), 195.0, 100),
        bar(date(2024, 6, 4), 196.0, 200),
    ];
    store.upsert_bars("AAPL", &input).await.unwrap();

    let bars = store
        .get_bars("AAPL", date(2024, 6, 3), date(2024, 6, 5))
        .await
        .unwrap();
    assert_eq!(bars.len(), 3);
    assert_eq!(bars[0].date, date(2024, 6, 3));
    assert_eq!(bars[2].date, date(2024, 6, 5));

    let last = store.last_bar("AAPL").await.unwrap().unwrap();
    assert_eq!(last.date, date(2024, 6, 5));

    // Empty range errors nowhere
    let none = store
        .get_bars("AAPL", date(2023, 1, 1), date(2023, 12, 31))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_bars_for_unknown_symbol_fail_with_not_found() {
    let (_dir, store) = test_backend().await;
    let err = store
        .upsert_bars("UNKNOWN", &[bar(date(2024, 6, 3), 10.0, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, FabricError::NotFound(_)));
}

#[tokio::test]
async fn test_fundamentals_ordering_and_replace() {
    let (_dir, store) = test_backend().await;
    store
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();

    let rows = vec![
        Fundamental {
            metric_type: "pe_ratio".to_string(),
            period_ending: date(2024, 3, 31),
            value: 28.0,
            currency: "USD".to_string(),
            reported_at: None,
            data_source: "test".to_string(),
        },
        Fundamental {
            metric_type: "eps".to_string(),
            period_ending: date(2024, 6, 30),
            value: 1.40,
            currency: "USD".to_string(),
            reported_at: None,
            data_source: "test".to_string(),
        },
        Fundamental {
            metric_type: "pe_ratio".to_string(),
            period_ending: date(2024, 6, 30),
            value: 29.5,
            currency: "USD".to_string(),
            reported_at: None,
            data_source: "test".to_string(),
        },
    ];
    store.upsert_fundamentals("AAPL", &rows).await.unwrap();

    let all = store.get_fundamentals("AAPL", None).await.unwrap();
    // Newest period first, ascending metric name within a period
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].period_ending, date(2024, 6, 30));
    assert_eq!(all[0].metric_type, "eps");
    assert_eq!(all[1].metric_type, "pe_ratio");
    assert_eq!(all[2].period_ending, date(2024, 3, 31));

    // Replace on the uniqueness key
    let fresher = vec![Fundamental {
        metric_type: "pe_ratio".to_string(),
        period_ending: date(2024, 6, 30),
        value: 30.1,
        currency: "USD".to_string(),
        reported_at: Some(date(2024, 7, 15)),
        data_source: "test".to_string(),
    }];
    store.upsert_fundamentals("AAPL", &fresher).await.unwrap();
    let filtered = store
        .get_fundamentals("AAPL", Some("pe_ratio"))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 2);
    assert_eq!(filtered[0].value, 30.1);
}

#[tokio::test]
async fn test_indicator_rows_keyed_by_parameter_fingerprint() {
    let (_dir, store) = test_backend().await;
    store
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();

    let day = date(2024, 6, 3);
    let rows = vec![
        IndicatorValue {
            indicator_type: "SMA".to_string(),
            date: day,
            value: 190.0,
            parameter_fingerprint: r#"{"period":50}"#.to_string(),
        },
        IndicatorValue {
            indicator_type: "SMA".to_string(),
            date: day,
            value: 193.0,
            parameter_fingerprint: r#"{"period":20}"#.to_string(),
        },
    ];
    store.upsert_indicators("AAPL", &rows).await.unwrap();

    // Distinct parameter sets produce distinct rows
    let all = store.get_indicators("AAPL", Some("SMA"), None).await.unwrap();
    assert_eq!(all.len(), 2);

    // Identical parameters replace
    let replacement = vec![IndicatorValue {
        indicator_type: "SMA".to_string(),
        date: day,
        value: 191.0,
        parameter_fingerprint: r#"{"period":50}"#.to_string(),
    }];
    store.upsert_indicators("AAPL", &replacement).await.unwrap();
    let all = store.get_indicators("AAPL", Some("SMA"), None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|r| r.value == 191.0));

    // since-filter
    let none = store
        .get_indicators("AAPL", None, Some(date(2024, 7, 1)))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_fx_rate_validity_and_raw_reads() {
    let (_dir, store) = test_backend().await;

    let expired = FxRate {
        from_currency: "USD".to_string(),
        to_currency: "EUR".to_string(),
        rate: 0.92,
        source_rate: 0.92,
        expires_at: Utc::now() - chrono::Duration::seconds(1),
        data_source: "test".to_string(),
    };
    store.upsert_fx_rate(&expired).await.unwrap();

    // Validity-filtered read sees nothing; raw read sees the row
    assert!(store.get_fx_rate("USD", "EUR").await.unwrap().is_none());
    let raw = store.get_fx_rate_raw("USD", "EUR").await.unwrap().unwrap();
    assert_eq!(raw.rate, 0.92);

    // Replace-on-conflict keeps one row per ordered pair
    let fresh = FxRate {
        expires_at: Utc::now() + chrono::Duration::minutes(30),
        rate: 0.93,
        ..expired.clone()
    };
    store.upsert_fx_rate(&fresh).await.unwrap();
    let valid = store.get_fx_rate("usd", "eur").await.unwrap().unwrap();
    assert_eq!(valid.rate, 0.93);

    // Both upserts appended history rows
    let history = store
        .fx_rate_history(
            "USD",
            "EUR",
            Utc::now() - chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].recorded_at <= history[1].recorded_at);
}

#[tokio::test]
async fn test_reap_expired_fx_rates() {
    let (_dir, store) = test_backend().await;

    for (to, offset_secs) in [("EUR", -10), ("CAD", -10), ("JPY", 3600)] {
        let rate = FxRate {
            from_currency: "USD".to_string(),
            to_currency: to.to_string(),
            rate: 1.0,
            source_rate: 1.0,
            expires_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            data_source: "test".to_string(),
        };
        store.upsert_fx_rate(&rate).await.unwrap();
    }

    assert_eq!(store.reap_expired_fx_rates().await.unwrap(), 2);
    assert!(store.get_fx_rate("USD", "JPY").await.unwrap().is_some());
}

#[tokio::test]
async fn test_cache_ledger_touch_validity_and_reap() {
    let (_dir, store) = test_backend().await;

    store
        .touch_cache("analyze:AAPL", DataClass::Analysis, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(store.is_cache_valid("analyze:AAPL").await.unwrap());
    assert!(!store.is_cache_valid("analyze:MSFT").await.unwrap());

    // Second touch increments the access count and refreshes expiry
    store
        .touch_cache("analyze:AAPL", DataClass::Analysis, Duration::from_secs(60))
        .await
        .unwrap();
    let entry = store.get_cache_entry("analyze:AAPL").await.unwrap().unwrap();
    assert_eq!(entry.access_count, 2);
    assert_eq!(entry.data_class, DataClass::Analysis);

    // An entry expiring "now" is already invalid
    store
        .touch_cache("fx:USD:EUR", DataClass::Fx, Duration::from_secs(0))
        .await
        .unwrap();
    assert!(!store.is_cache_valid("fx:USD:EUR").await.unwrap());

    // Exactly the expired rows are reaped
    store
        .touch_cache("ohlcv:X:a:b", DataClass::Ohlcv, Duration::from_secs(0))
        .await
        .unwrap();
    store
        .touch_cache("ohlcv:Y:a:b", DataClass::Ohlcv, Duration::from_secs(0))
        .await
        .unwrap();
    let reaped = store.reap_expired_cache().await.unwrap();
    assert_eq!(reaped, 3);
    assert!(store.is_cache_valid("analyze:AAPL").await.unwrap());

    // delete + clear
    store.delete_cache_entry("analyze:AAPL").await.unwrap();
    assert!(!store.is_cache_valid("analyze:AAPL").await.unwrap());
    store
        .touch_cache("analyze:Z", DataClass::Analysis, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(store.clear_cache_metadata().await.unwrap(), 1);
}

#[tokio::test]
async fn test_health_snapshot_counts() {
    let (_dir, store) = test_backend().await;

    let empty = store.health_snapshot().await;
    assert!(empty.healthy);
    assert_eq!(empty.connection, "connected");
    assert_eq!(empty.stats.symbols, 0);
    assert!(empty.last_updated.is_none());

    store
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();
    store
        .upsert_bars("AAPL", &[bar(date(2024, 6, 3), 195.0, 1_000)])
        .await
        .unwrap();
    store.record_fetch("AAPL", "test", 1).await.unwrap();

    let populated = store.health_snapshot().await;
    assert_eq!(populated.stats.symbols, 1);
    assert_eq!(populated.stats.bars, 1);
    assert!(populated.last_updated.is_some());
}
