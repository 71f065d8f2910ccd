//! End-to-end analysis flow against the embedded backend and mock upstream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tempfile::TempDir;

use stockline_common::cache::CacheManager;
use stockline_common::keys::{analysis_key, DataClass};
use stockline_common::model::{Bar, SymbolMeta};
use stockline_common::orchestrator::{Analyzer, AnalyzerSettings};
use stockline_common::storage::{SqliteBackend, StorageBackend};
use stockline_common::upstream::{MarketDataSource, MockSource};
use stockline_common::FabricError;

struct Fixture {
    _dir: TempDir,
    storage: Arc<dyn StorageBackend>,
    cache: Arc<CacheManager>,
    mock: Arc<MockSource>,
    analyzer: Arc<Analyzer>,
}

async fn fixture_with(mock: MockSource) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let storage: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::connect(&url).await.expect("connect sqlite"));
    let cache = Arc::new(CacheManager::new(Arc::clone(&storage), None, None));
    let mock = Arc::new(mock);
    let upstream: Arc<dyn MarketDataSource> = Arc::clone(&mock) as Arc<dyn MarketDataSource>;
    let analyzer = Arc::new(Analyzer::new(
        Arc::clone(&storage),
        Arc::clone(&cache),
        upstream,
        AnalyzerSettings::default(),
    ));
    Fixture {
        _dir: dir,
        storage,
        cache,
        mock,
        analyzer,
    }
}

async fn fixture() -> Fixture {
    fixture_with(MockSource::new()).await
}

/// Fifty ramp bars ending today, closes 100..=149.
fn seed_bars() -> Vec<Bar> {
    let today = Utc::now().date_naive();
    (0..50)
        .map(|i| {
            let close = 100.0 + i as f64;
            Bar {
                date: today - chrono::Duration::days(49 - i),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10_000,
                adjusted_close: close,
                split_ratio: 1.0,
                dividend: 0.0,
                currency: "USD".to_string(),
                data_source: "test".to_string(),
            }
        })
        .collect()
}

#[tokio::test]
async fn test_cold_miss_then_warm_hit() {
    let fx = fixture().await;

    let first = fx.analyzer.analyze("AAPL", 50).await.unwrap();

    // Exactly one upstream call populated one symbol and fifty bars
    assert_eq!(fx.mock.call_count(), 1);
    assert!(fx.storage.get_symbol("AAPL").await.unwrap().is_some());
    let today = Utc::now().date_naive();
    let bars = fx
        .storage
        .get_bars("AAPL", today - chrono::Duration::days(60), today)
        .await
        .unwrap();
    assert_eq!(bars.len(), 50);

    // Ramp 100..=149: SMA over all fifty closes
    assert_eq!(first.current_price, 149.0);
    assert_eq!(first.sma_50, Some(124.5));
    assert!(first.rsi_14.is_some());
    assert_eq!(first.historical.len(), 50);
    assert!(first.historical[0].date < first.historical[49].date);

    // The analysis entry landed in the memory tier
    let stats = fx.cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.sets, 1);

    // Warm hit: identical payload, zero further upstream calls
    let second = fx.analyzer.analyze("aapl", 50).await.unwrap();
    assert_eq!(fx.mock.call_count(), 1);
    assert_eq!(first, second);
    assert!(fx.cache.stats().memory_hits >= 1);
}

#[tokio::test]
async fn test_expired_memory_with_valid_ledger_rebuilds_from_storage() {
    let fx = fixture().await;

    // Bars already persisted; the memory entry is expired but the ledger
    // still vouches for the key
    fx.storage
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();
    fx.storage.upsert_bars("AAPL", &seed_bars()).await.unwrap();

    let key = analysis_key("AAPL");
    fx.cache
        .set(
            &key,
            "{\"stale\":true}".to_string(),
            Duration::from_millis(0),
            DataClass::Analysis,
        )
        .await
        .unwrap();
    fx.storage
        .touch_cache(&key, DataClass::Analysis, Duration::from_secs(3600))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let evictions_before = fx.cache.stats().evictions;
    let result = fx.analyzer.analyze("AAPL", 50).await.unwrap();

    // Memory eviction counted, result rebuilt from storage, upstream idle
    assert_eq!(fx.cache.stats().evictions, evictions_before + 1);
    assert_eq!(fx.mock.call_count(), 0);
    assert_eq!(result.current_price, 149.0);
    assert_eq!(result.sma_50, Some(124.5));
}

#[tokio::test]
async fn test_concurrent_misses_coalesce_into_one_populator() {
    let fx = fixture_with(MockSource::new().with_delay(Duration::from_millis(200))).await;

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..50 {
        let analyzer = Arc::clone(&fx.analyzer);
        handles.push(tokio::spawn(
            async move { analyzer.analyze("MSFT", 50).await },
        ));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    let elapsed = started.elapsed();

    // One upstream invocation; everyone saw the same payload; the batch
    // completed in roughly one populator's latency, not fifty
    assert_eq!(fx.mock.call_count(), 1);
    let first = &results[0];
    assert!(results.iter().all(|r| r == first));
    assert!(
        elapsed < Duration::from_secs(3),
        "coalesced batch took {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_insufficient_data_and_failed_upstream_is_not_found() {
    let fx = fixture().await;
    fx.mock
        .fail_with(FabricError::UpstreamUnavailable("provider down".to_string()));

    let err = fx.analyzer.analyze("AAPL", 50).await.unwrap_err();
    assert!(matches!(err, FabricError::NotFound(_)));
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn test_symbol_and_range_validation() {
    let fx = fixture().await;

    let err = fx.analyzer.analyze("not a symbol!", 50).await.unwrap_err();
    assert!(matches!(err, FabricError::Validation(_)));
    assert_eq!(err.http_status(), 400);

    let err = fx.analyzer.analyze("AAPL", 0).await.unwrap_err();
    assert!(matches!(err, FabricError::Validation(_)));

    // Nothing hit upstream or storage write paths
    assert_eq!(fx.mock.call_count(), 0);
}

#[tokio::test]
async fn test_short_series_leaves_indicators_unset() {
    let fx = fixture().await;
    let today = Utc::now().date_naive();
    fx.mock.set_series(
        "TINY",
        (0..5)
            .map(|i| {
                stockline_common::model::RawBar::new(
                    today - chrono::Duration::days(4 - i),
                    10.0,
                    11.0,
                    9.0,
                    10.0 + i as f64 * 0.1,
                    100,
                )
            })
            .collect(),
    );

    let result = fx.analyzer.analyze("TINY", 50).await.unwrap();
    assert_eq!(result.sma_50, None);
    assert_eq!(result.rsi_14, None);
    assert_eq!(result.signal, stockline_common::Signal::Hold);
    assert_eq!(result.historical.len(), 5);
}

#[tokio::test]
async fn test_daily_bars_read_through_cache() {
    let fx = fixture().await;
    fx.storage
        .upsert_symbol("AAPL", &SymbolMeta::default())
        .await
        .unwrap();
    fx.storage.upsert_bars("AAPL", &seed_bars()).await.unwrap();

    let today = Utc::now().date_naive();
    let start = today - chrono::Duration::days(49);

    let first = fx.analyzer.daily_bars("aapl", start, today).await.unwrap();
    assert_eq!(first.len(), 50);

    // Second read is served from the memory tier
    let hits_before = fx.cache.stats().memory_hits;
    let second = fx.analyzer.daily_bars("AAPL", start, today).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fx.cache.stats().memory_hits, hits_before + 1);

    // An unknown symbol is an empty answer, not an error, and is not cached
    let none = fx.analyzer.daily_bars("GHOST", start, today).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_cache_set_get_delete_roundtrip() {
    let fx = fixture().await;

    fx.cache
        .set(
            "ohlcv:AAPL:2024-01-01:2024-06-01",
            "[1,2,3]".to_string(),
            Duration::from_secs(60),
            DataClass::Ohlcv,
        )
        .await
        .unwrap();

    match fx.cache.get("ohlcv:AAPL:2024-01-01:2024-06-01").await.unwrap() {
        stockline_common::CacheOutcome::Hit(value) => assert_eq!(value, "[1,2,3]"),
        other => panic!("expected hit, got {:?}", other),
    }

    fx.cache
        .delete("ohlcv:AAPL:2024-01-01:2024-06-01")
        .await
        .unwrap();
    // Memory gone and ledger row deleted: a fresh get is a miss
    assert_eq!(
        fx.cache.get("ohlcv:AAPL:2024-01-01:2024-06-01").await.unwrap(),
        stockline_common::CacheOutcome::Miss
    );

    // Size-based eviction honors the cap
    for i in 0..10 {
        fx.cache
            .set(
                &format!("k{}", i),
                "v".to_string(),
                Duration::from_secs(60),
                DataClass::Unknown,
            )
            .await
            .unwrap();
    }
    let evicted = fx.cache.enforce_max_entries(4);
    assert_eq!(evicted, 6);
    assert_eq!(fx.cache.stats().entries, 4);
}
