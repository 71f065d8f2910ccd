//! FX subsystem behavior and normalization through the full pipeline.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use stockline_common::cache::CacheManager;
use stockline_common::fx::{ConvertRequest, FxService};
use stockline_common::model::{CorporateAction, FxRate, RawBar};
use stockline_common::orchestrator::{Analyzer, AnalyzerSettings};
use stockline_common::storage::{SqliteBackend, StorageBackend};
use stockline_common::upstream::{MarketDataSource, MockSource};
use stockline_common::FabricError;

async fn test_backend() -> (TempDir, Arc<dyn StorageBackend>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let backend = SqliteBackend::connect(&url).await.expect("connect sqlite");
    (dir, Arc::new(backend) as Arc<dyn StorageBackend>)
}

/// FX service with no providers: only cached rows can answer.
fn cache_only_fx(storage: Arc<dyn StorageBackend>) -> FxService {
    FxService::new(storage, Vec::new())
}

#[tokio::test]
async fn test_inversion_reuse_without_provider_calls() {
    let (_dir, storage) = test_backend().await;

    let usd_cad = FxRate {
        from_currency: "USD".to_string(),
        to_currency: "CAD".to_string(),
        rate: 1.35,
        source_rate: 1.35,
        expires_at: Utc::now() + chrono::Duration::minutes(30),
        data_source: "test".to_string(),
    };
    storage.upsert_fx_rate(&usd_cad).await.unwrap();

    let fx = cache_only_fx(Arc::clone(&storage));
    let converted = fx.convert("CAD", "USD", 100.0).await.unwrap();
    assert!((converted - 100.0 / 1.35).abs() <= f64::EPSILON * 100.0);

    // The inverted result was not written back as a CAD->USD row
    assert!(storage.get_fx_rate("CAD", "USD").await.unwrap().is_none());
}

#[tokio::test]
async fn test_inversion_applies_even_when_direct_rate_expired() {
    let (_dir, storage) = test_backend().await;

    let stale_direct = FxRate {
        from_currency: "CAD".to_string(),
        to_currency: "USD".to_string(),
        rate: 0.70,
        source_rate: 0.70,
        expires_at: Utc::now() - chrono::Duration::minutes(5),
        data_source: "test".to_string(),
    };
    storage.upsert_fx_rate(&stale_direct).await.unwrap();

    let valid_inverse = FxRate {
        from_currency: "USD".to_string(),
        to_currency: "CAD".to_string(),
        rate: 1.35,
        source_rate: 1.35,
        expires_at: Utc::now() + chrono::Duration::minutes(30),
        data_source: "test".to_string(),
    };
    storage.upsert_fx_rate(&valid_inverse).await.unwrap();

    let fx = cache_only_fx(storage);
    let rate = fx.rate("CAD", "USD").await.unwrap();
    assert!((rate - 1.0 / 1.35).abs() <= f64::EPSILON * 10.0);
}

#[tokio::test]
async fn test_same_currency_short_circuits() {
    let (_dir, storage) = test_backend().await;
    let fx = cache_only_fx(storage);

    assert_eq!(fx.rate("USD", "usd").await.unwrap(), 1.0);
    assert_eq!(fx.convert("EUR", "EUR", 250.0).await.unwrap(), 250.0);
}

#[tokio::test]
async fn test_total_failure_is_fx_unavailable() {
    let (_dir, storage) = test_backend().await;
    let fx = cache_only_fx(storage);

    let err = fx.convert("EUR", "JPY", 10.0).await.unwrap_err();
    assert!(matches!(err, FabricError::FxUnavailable(_)));
    assert_eq!(err.http_status(), 500);

    // Malformed codes fail validation before anything else
    let err = fx.rate("EURO", "JPY").await.unwrap_err();
    assert!(matches!(err, FabricError::Validation(_)));
}

#[tokio::test]
async fn test_batch_convert_isolates_failures() {
    let (_dir, storage) = test_backend().await;

    let usd_cad = FxRate {
        from_currency: "USD".to_string(),
        to_currency: "CAD".to_string(),
        rate: 1.35,
        source_rate: 1.35,
        expires_at: Utc::now() + chrono::Duration::minutes(30),
        data_source: "test".to_string(),
    };
    storage.upsert_fx_rate(&usd_cad).await.unwrap();

    let fx = cache_only_fx(storage);
    let outcomes = fx
        .batch_convert(&[
            ConvertRequest {
                from: "USD".to_string(),
                to: "CAD".to_string(),
                amount: 10.0,
            },
            ConvertRequest {
                from: "EUR".to_string(),
                to: "JPY".to_string(),
                amount: 10.0,
            },
            ConvertRequest {
                from: "GBP".to_string(),
                to: "GBP".to_string(),
                amount: 10.0,
            },
        ])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(FabricError::FxUnavailable(_))
    ));
    assert_eq!(*outcomes[2].result.as_ref().unwrap(), 10.0);
}

#[tokio::test]
async fn test_average_rate_over_history_window() {
    let (_dir, storage) = test_backend().await;

    for rate in [1.30, 1.40] {
        let row = FxRate {
            from_currency: "USD".to_string(),
            to_currency: "CAD".to_string(),
            rate,
            source_rate: rate,
            expires_at: Utc::now() + chrono::Duration::minutes(30),
            data_source: "test".to_string(),
        };
        storage.upsert_fx_rate(&row).await.unwrap();
    }

    let fx = cache_only_fx(storage);
    let start = Utc::now() - chrono::Duration::hours(1);
    let end = Utc::now() + chrono::Duration::hours(1);

    let average = fx.average_rate("USD", "CAD", start, end).await.unwrap();
    assert_eq!(average, Some(1.35));

    let empty = fx.average_rate("USD", "JPY", start, end).await.unwrap();
    assert_eq!(empty, None);
}

// =================================================================
// Normalization through the orchestrator
// =================================================================

struct PipelineFixture {
    _dir: TempDir,
    storage: Arc<dyn StorageBackend>,
    mock: Arc<MockSource>,
    analyzer: Analyzer,
}

async fn pipeline_fixture() -> PipelineFixture {
    let (dir, storage) = test_backend().await;
    let cache = Arc::new(CacheManager::new(Arc::clone(&storage), None, None));
    let mock = Arc::new(MockSource::new());
    let analyzer = Analyzer::new(
        Arc::clone(&storage),
        cache,
        Arc::clone(&mock) as Arc<dyn MarketDataSource>,
        AnalyzerSettings::default(),
    );
    PipelineFixture {
        _dir: dir,
        storage,
        mock,
        analyzer,
    }
}

#[tokio::test]
async fn test_split_adjustment_flows_into_storage() {
    let fx = pipeline_fixture().await;
    let today = Utc::now().date_naive();

    fx.mock.set_series(
        "NVDA",
        vec![
            RawBar::new(today - chrono::Duration::days(5), 598.0, 606.0, 597.0, 600.0, 1_000),
            RawBar::new(today - chrono::Duration::days(1), 600.0, 610.0, 598.0, 605.0, 1_000),
        ],
    );
    fx.mock.set_actions(
        "NVDA",
        vec![CorporateAction::split(today - chrono::Duration::days(3), 4.0)],
    );

    let result = fx.analyzer.analyze("NVDA", 30).await.unwrap();
    assert_eq!(result.current_price, 605.0);

    let bars = fx
        .storage
        .get_bars("NVDA", today - chrono::Duration::days(10), today)
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
    // Pre-split day: prices divided by four, volume multiplied by four
    assert_eq!(bars[0].close, 150.0);
    assert_eq!(bars[0].volume, 4_000);
    assert_eq!(bars[0].split_ratio, 4.0);
    assert_eq!(bars[0].adjusted_close, 600.0);
    // Post-split day untouched
    assert_eq!(bars[1].close, 605.0);
    assert_eq!(bars[1].split_ratio, 1.0);

    // Actions were persisted alongside the bars
    let actions = fx.storage.get_corporate_actions("NVDA").await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].split_ratio, 4.0);
}

#[tokio::test]
async fn test_rejected_batch_leaves_storage_unchanged() {
    let fx = pipeline_fixture().await;
    let today = Utc::now().date_naive();

    // One inverted bar (low > high) poisons the batch
    fx.mock.set_series(
        "BAD",
        vec![
            RawBar::new(today - chrono::Duration::days(2), 100.0, 101.0, 99.0, 100.0, 500),
            RawBar::new(today - chrono::Duration::days(1), 104.5, 104.0, 105.0, 104.2, 500),
        ],
    );

    let err = fx.analyzer.analyze("BAD", 30).await.unwrap_err();
    assert!(matches!(err, FabricError::DataQuality(_)));

    // Nothing was persisted: no symbol row, no bars
    assert!(fx.storage.get_symbol("BAD").await.unwrap().is_none());
    let bars = fx
        .storage
        .get_bars("BAD", today - chrono::Duration::days(10), today)
        .await
        .unwrap();
    assert!(bars.is_empty());
}
