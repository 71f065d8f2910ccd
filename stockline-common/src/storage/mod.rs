//! Persistent storage for the fabric.
//!
//! One capability set, two variants: an embedded single-file SQLite store and
//! a hosted Postgres store. Callers hold an `Arc<dyn StorageBackend>` and
//! never discriminate on the variant; dialect differences (batch-insert form,
//! now-expressions, casefold collation) are encapsulated here.
//!
//! Both variants agree on case semantics: symbols are uppercased at the
//! boundary and matched case-insensitively, so `"aapl"` and `"AAPL"` name the
//! same row everywhere.

mod postgres;
mod sqlite;

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::config::{AppConfig, StorageMode};
use crate::error::FabricResult;
use crate::keys::DataClass;
use crate::model::{
    Bar, CacheEntryMeta, CorporateAction, Fundamental, FxRate, FxRateSample, HealthSnapshot,
    IndicatorValue, SymbolRecord, SymbolMeta, SymbolPatch,
};

/// Typed CRUD over the fabric's entities plus the cache freshness ledger.
///
/// Contracts shared by both variants:
///
/// - multi-row upserts are atomic: all rows land or none do;
/// - time-series reads are date-ascending; fundamentals and indicators are
///   newest-first with an ascending text tie-break for determinism;
/// - bars, fundamentals, indicators and corporate actions for an unknown
///   symbol fail with `NotFound` — callers upsert the symbol first;
/// - `get_fx_rate` only ever returns rows with `expires_at > now`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ---- symbols ----

    /// Casefolded lookup.
    async fn get_symbol(&self, symbol: &str) -> FabricResult<Option<SymbolRecord>>;

    /// Insert if absent, otherwise update the supplied mutable attributes and
    /// bump `updated_at`. `created_at` is preserved. Returns the stored row.
    async fn upsert_symbol(&self, symbol: &str, meta: &SymbolMeta) -> FabricResult<SymbolRecord>;

    /// Partial update. No-op when the patch is empty; `NotFound` when the
    /// symbol is unknown.
    async fn update_symbol(&self, symbol: &str, patch: &SymbolPatch) -> FabricResult<()>;

    // ---- bars ----

    /// Inclusive date range, ascending. Empty when nothing matches.
    async fn get_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FabricResult<Vec<Bar>>;

    /// Most recent bar for the symbol, if any.
    async fn last_bar(&self, symbol: &str) -> FabricResult<Option<Bar>>;

    /// Atomic batch upsert; replace-on-conflict at `(symbol_id, date)`.
    /// Returns the number of rows written.
    async fn upsert_bars(&self, symbol: &str, bars: &[Bar]) -> FabricResult<usize>;

    // ---- fundamentals ----

    /// Ordered by `period_ending` descending, then `metric_type` ascending.
    async fn get_fundamentals(
        &self,
        symbol: &str,
        metric_type: Option<&str>,
    ) -> FabricResult<Vec<Fundamental>>;

    /// Replace-on-conflict at `(symbol_id, metric_type, period_ending)`.
    async fn upsert_fundamentals(
        &self,
        symbol: &str,
        rows: &[Fundamental],
    ) -> FabricResult<usize>;

    // ---- indicators ----

    /// Ordered by `date` descending, then `indicator_type` ascending.
    async fn get_indicators(
        &self,
        symbol: &str,
        indicator_type: Option<&str>,
        since: Option<NaiveDate>,
    ) -> FabricResult<Vec<IndicatorValue>>;

    /// Replace-on-conflict at
    /// `(symbol_id, indicator_type, date, parameter_fingerprint)`.
    async fn upsert_indicators(
        &self,
        symbol: &str,
        rows: &[IndicatorValue],
    ) -> FabricResult<usize>;

    // ---- corporate actions ----

    /// All recorded actions for the symbol, ascending by date.
    async fn get_corporate_actions(&self, symbol: &str) -> FabricResult<Vec<CorporateAction>>;

    /// Replace-on-conflict at `(symbol_id, action_date, action_type)`.
    async fn upsert_corporate_actions(
        &self,
        symbol: &str,
        actions: &[CorporateAction],
    ) -> FabricResult<usize>;

    // ---- fx ----

    /// Valid rows only (`expires_at > now`).
    async fn get_fx_rate(&self, from: &str, to: &str) -> FabricResult<Option<FxRate>>;

    /// The stored row regardless of expiry.
    async fn get_fx_rate_raw(&self, from: &str, to: &str) -> FabricResult<Option<FxRate>>;

    /// Replace-on-conflict at the ordered pair; appends a history row.
    async fn upsert_fx_rate(&self, rate: &FxRate) -> FabricResult<()>;

    /// History rows inside the window, ascending by `recorded_at`.
    async fn fx_rate_history(
        &self,
        from: &str,
        to: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FabricResult<Vec<FxRateSample>>;

    /// Delete rate rows with `expires_at <= now`; returns the count.
    async fn reap_expired_fx_rates(&self) -> FabricResult<u64>;

    // ---- cache freshness ledger ----

    /// True iff an unexpired metadata row exists for `key`.
    async fn is_cache_valid(&self, key: &str) -> FabricResult<bool>;

    /// Upsert ledger metadata: refresh expiry and last-access, increment the
    /// access count (1 on first insert).
    async fn touch_cache(&self, key: &str, class: DataClass, ttl: Duration) -> FabricResult<()>;

    /// Ledger row for `key`, if present (expired or not).
    async fn get_cache_entry(&self, key: &str) -> FabricResult<Option<CacheEntryMeta>>;

    /// Remove one ledger row.
    async fn delete_cache_entry(&self, key: &str) -> FabricResult<()>;

    /// Truncate the ledger; returns the number of rows removed.
    async fn clear_cache_metadata(&self) -> FabricResult<u64>;

    /// Delete ledger rows with `expires_at <= now`; returns the count.
    async fn reap_expired_cache(&self) -> FabricResult<u64>;

    // ---- bookkeeping ----

    /// Record an upstream fetch in the fetch log (feeds health freshness).
    async fn record_fetch(&self, symbol: &str, source: &str, rows: u64) -> FabricResult<()>;

    /// Liveness and row-count snapshot; degrades instead of erroring.
    async fn health_snapshot(&self) -> HealthSnapshot;
}

/// Construct the storage variant selected by configuration.
pub async fn connect(config: &AppConfig) -> FabricResult<Arc<dyn StorageBackend>> {
    match config.mode {
        StorageMode::Embedded => {
            let backend = SqliteBackend::connect(&config.database_url).await?;
            Ok(Arc::new(backend))
        }
        StorageMode::Hosted => {
            let backend = PostgresBackend::connect(&config.database_url).await?;
            Ok(Arc::new(backend))
        }
    }
}
