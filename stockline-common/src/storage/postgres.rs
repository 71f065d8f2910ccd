//! Hosted remote storage variant.
//!
//! Backed by Postgres through `sqlx`. Batch upserts go through
//! `QueryBuilder::push_values` in chunks; symbol matching is
//! case-insensitive via `UPPER(symbol)` so this variant agrees with the
//! embedded one on `"aapl" == "AAPL"`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, error, warn};

use crate::error::{FabricError, FabricResult};
use crate::keys::{normalize_symbol, DataClass};
use crate::model::{
    ActionKind, Bar, CacheEntryMeta, CorporateAction, Fundamental, FxRate, FxRateSample,
    HealthSnapshot, IndicatorValue, StoreStats, SymbolMeta, SymbolPatch, SymbolRecord,
};

use super::StorageBackend;

/// Rows per batched INSERT; keeps each statement under parameter limits.
const BATCH_CHUNK_SIZE: usize = 500;

/// Postgres-backed store shared across processes.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect and prepare the schema.
    pub async fn connect(url: &str) -> FabricResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;

        let backend = Self { pool };
        backend.initialize_schema().await?;
        debug!("postgres store ready");
        Ok(backend)
    }

    /// Pool handle for tests.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn initialize_schema(&self) -> FabricResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS symbols (
                id BIGSERIAL PRIMARY KEY,
                symbol TEXT NOT NULL UNIQUE,
                name TEXT,
                currency TEXT NOT NULL DEFAULT 'USD',
                exchange TEXT,
                isin TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                symbol_id BIGINT NOT NULL REFERENCES symbols(id),
                date DATE NOT NULL,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                volume BIGINT NOT NULL DEFAULT 0,
                adjusted_close DOUBLE PRECISION NOT NULL,
                split_ratio DOUBLE PRECISION NOT NULL DEFAULT 1.0,
                dividend DOUBLE PRECISION NOT NULL DEFAULT 0.0,
                currency TEXT NOT NULL DEFAULT 'USD',
                data_source TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (symbol_id, date)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fundamentals (
                symbol_id BIGINT NOT NULL REFERENCES symbols(id),
                metric_type TEXT NOT NULL,
                period_ending DATE NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                currency TEXT NOT NULL DEFAULT 'USD',
                reported_at DATE,
                data_source TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (symbol_id, metric_type, period_ending)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS indicators (
                symbol_id BIGINT NOT NULL REFERENCES symbols(id),
                indicator_type TEXT NOT NULL,
                date DATE NOT NULL,
                parameter_fingerprint TEXT NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (symbol_id, indicator_type, date, parameter_fingerprint)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fx_rates (
                from_currency TEXT NOT NULL,
                to_currency TEXT NOT NULL,
                rate DOUBLE PRECISION NOT NULL,
                source_rate DOUBLE PRECISION NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                data_source TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (from_currency, to_currency)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fx_rate_history (
                id BIGSERIAL PRIMARY KEY,
                from_currency TEXT NOT NULL,
                to_currency TEXT NOT NULL,
                rate DOUBLE PRECISION NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                data_source TEXT NOT NULL DEFAULT ''
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cache_metadata (
                cache_key TEXT PRIMARY KEY,
                data_class TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                access_count BIGINT NOT NULL DEFAULT 1,
                last_accessed TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS corporate_actions (
                symbol_id BIGINT NOT NULL REFERENCES symbols(id),
                action_date DATE NOT NULL,
                action_type TEXT NOT NULL,
                split_ratio DOUBLE PRECISION NOT NULL DEFAULT 1.0,
                dividend_amount DOUBLE PRECISION NOT NULL DEFAULT 0.0,
                adjustment_factor DOUBLE PRECISION NOT NULL DEFAULT 1.0,
                PRIMARY KEY (symbol_id, action_date, action_type)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fetch_log (
                id BIGSERIAL PRIMARY KEY,
                symbol TEXT NOT NULL,
                data_source TEXT NOT NULL,
                row_count BIGINT NOT NULL DEFAULT 0,
                fetched_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_fundamentals_symbol_metric ON fundamentals (symbol_id, metric_type)",
            "CREATE INDEX IF NOT EXISTS idx_indicators_symbol_type_date ON indicators (symbol_id, indicator_type, date)",
            "CREATE INDEX IF NOT EXISTS idx_cache_metadata_expires ON cache_metadata (expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_fx_history_pair ON fx_rate_history (from_currency, to_currency, recorded_at)",
            "CREATE INDEX IF NOT EXISTS idx_fetch_log_time ON fetch_log (fetched_at)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn symbol_id(&self, symbol: &str) -> FabricResult<Option<i64>> {
        let normalized = normalize_symbol(symbol);
        let row = sqlx::query("SELECT id FROM symbols WHERE UPPER(symbol) = $1")
            .bind(&normalized)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn require_symbol_id(&self, symbol: &str) -> FabricResult<i64> {
        self.symbol_id(symbol).await?.ok_or_else(|| {
            FabricError::not_found(format!("symbol not registered: {}", normalize_symbol(symbol)))
        })
    }
}

fn symbol_from_row(row: &PgRow) -> FabricResult<SymbolRecord> {
    Ok(SymbolRecord {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        currency: row.try_get("currency")?,
        exchange: row.try_get("exchange")?,
        isin: row.try_get("isin")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn bar_from_row(row: &PgRow) -> FabricResult<Bar> {
    Ok(Bar {
        date: row.try_get("date")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        adjusted_close: row.try_get("adjusted_close")?,
        split_ratio: row.try_get("split_ratio")?,
        dividend: row.try_get("dividend")?,
        currency: row.try_get("currency")?,
        data_source: row.try_get("data_source")?,
    })
}

fn fx_from_row(row: &PgRow) -> FabricResult<FxRate> {
    Ok(FxRate {
        from_currency: row.try_get("from_currency")?,
        to_currency: row.try_get("to_currency")?,
        rate: row.try_get("rate")?,
        source_rate: row.try_get("source_rate")?,
        expires_at: row.try_get("expires_at")?,
        data_source: row.try_get("data_source")?,
    })
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn get_symbol(&self, symbol: &str) -> FabricResult<Option<SymbolRecord>> {
        let normalized = normalize_symbol(symbol);
        let row = sqlx::query(
            "SELECT id, symbol, name, currency, exchange, isin, created_at, updated_at \
             FROM symbols WHERE UPPER(symbol) = $1",
        )
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(symbol_from_row).transpose()
    }

    async fn upsert_symbol(&self, symbol: &str, meta: &SymbolMeta) -> FabricResult<SymbolRecord> {
        let normalized = normalize_symbol(symbol);
        let now = Utc::now();

        let row = sqlx::query(
            r#"
            INSERT INTO symbols (symbol, name, currency, exchange, isin, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (symbol) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, symbols.name),
                currency = COALESCE($7, symbols.currency),
                exchange = COALESCE(EXCLUDED.exchange, symbols.exchange),
                isin = COALESCE(EXCLUDED.isin, symbols.isin),
                updated_at = EXCLUDED.updated_at
            RETURNING id, symbol, name, currency, exchange, isin, created_at, updated_at
            "#,
        )
        .bind(&normalized)
        .bind(&meta.name)
        .bind(meta.currency_or_default())
        .bind(&meta.exchange)
        .bind(&meta.isin)
        .bind(now)
        .bind(&meta.currency)
        .fetch_one(&self.pool)
        .await?;

        symbol_from_row(&row)
    }

    async fn update_symbol(&self, symbol: &str, patch: &SymbolPatch) -> FabricResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let id = self.require_symbol_id(symbol).await?;

        sqlx::query(
            r#"
            UPDATE symbols SET
                name = COALESCE($1, name),
                currency = COALESCE($2, currency),
                exchange = COALESCE($3, exchange),
                isin = COALESCE($4, isin),
                updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(&patch.name)
        .bind(&patch.currency)
        .bind(&patch.exchange)
        .bind(&patch.isin)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FabricResult<Vec<Bar>> {
        let Some(id) = self.symbol_id(symbol).await? else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            "SELECT date, open, high, low, close, volume, adjusted_close, split_ratio, \
                    dividend, currency, data_source \
             FROM bars WHERE symbol_id = $1 AND date >= $2 AND date <= $3 \
             ORDER BY date ASC",
        )
        .bind(id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(bar_from_row).collect()
    }

    async fn last_bar(&self, symbol: &str) -> FabricResult<Option<Bar>> {
        let Some(id) = self.symbol_id(symbol).await? else {
            return Ok(None);
        };

        let row = sqlx::query(
            "SELECT date, open, high, low, close, volume, adjusted_close, split_ratio, \
                    dividend, currency, data_source \
             FROM bars WHERE symbol_id = $1 ORDER BY date DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(bar_from_row).transpose()
    }

    async fn upsert_bars(&self, symbol: &str, bars: &[Bar]) -> FabricResult<usize> {
        if bars.is_empty() {
            return Ok(0);
        }
        let id = self.require_symbol_id(symbol).await?;

        let mut tx = self.pool.begin().await?;
        for chunk in bars.chunks(BATCH_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO bars (symbol_id, date, open, high, low, close, volume, \
                 adjusted_close, split_ratio, dividend, currency, data_source) ",
            );
            builder.push_values(chunk, |mut b, bar| {
                b.push_bind(id)
                    .push_bind(bar.date)
                    .push_bind(bar.open)
                    .push_bind(bar.high)
                    .push_bind(bar.low)
                    .push_bind(bar.close)
                    .push_bind(bar.volume)
                    .push_bind(bar.adjusted_close)
                    .push_bind(bar.split_ratio)
                    .push_bind(bar.dividend)
                    .push_bind(&bar.currency)
                    .push_bind(&bar.data_source);
            });
            builder.push(
                " ON CONFLICT (symbol_id, date) DO UPDATE SET \
                 open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                 close = EXCLUDED.close, volume = EXCLUDED.volume, \
                 adjusted_close = EXCLUDED.adjusted_close, split_ratio = EXCLUDED.split_ratio, \
                 dividend = EXCLUDED.dividend, currency = EXCLUDED.currency, \
                 data_source = EXCLUDED.data_source",
            );

            builder.build().execute(&mut *tx).await.map_err(|e| {
                error!("bar batch upsert failed for {}: {}", symbol, e);
                FabricError::from(e)
            })?;
        }
        tx.commit().await?;

        debug!("upserted {} bars for {}", bars.len(), normalize_symbol(symbol));
        Ok(bars.len())
    }

    async fn get_fundamentals(
        &self,
        symbol: &str,
        metric_type: Option<&str>,
    ) -> FabricResult<Vec<Fundamental>> {
        let Some(id) = self.symbol_id(symbol).await? else {
            return Ok(Vec::new());
        };

        let base = "SELECT metric_type, period_ending, value, currency, reported_at, data_source \
                    FROM fundamentals WHERE symbol_id = $1";
        let rows = match metric_type {
            Some(metric) => {
                sqlx::query(&format!(
                    "{} AND metric_type = $2 ORDER BY period_ending DESC, metric_type ASC",
                    base
                ))
                .bind(id)
                .bind(metric)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "{} ORDER BY period_ending DESC, metric_type ASC",
                    base
                ))
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                Ok(Fundamental {
                    metric_type: row.try_get("metric_type")?,
                    period_ending: row.try_get("period_ending")?,
                    value: row.try_get("value")?,
                    currency: row.try_get("currency")?,
                    reported_at: row.try_get("reported_at")?,
                    data_source: row.try_get("data_source")?,
                })
            })
            .collect()
    }

    async fn upsert_fundamentals(
        &self,
        symbol: &str,
        rows: &[Fundamental],
    ) -> FabricResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let id = self.require_symbol_id(symbol).await?;

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(BATCH_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO fundamentals (symbol_id, metric_type, period_ending, value, \
                 currency, reported_at, data_source) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(id)
                    .push_bind(&row.metric_type)
                    .push_bind(row.period_ending)
                    .push_bind(row.value)
                    .push_bind(&row.currency)
                    .push_bind(row.reported_at)
                    .push_bind(&row.data_source);
            });
            builder.push(
                " ON CONFLICT (symbol_id, metric_type, period_ending) DO UPDATE SET \
                 value = EXCLUDED.value, currency = EXCLUDED.currency, \
                 reported_at = EXCLUDED.reported_at, data_source = EXCLUDED.data_source",
            );
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    async fn get_indicators(
        &self,
        symbol: &str,
        indicator_type: Option<&str>,
        since: Option<NaiveDate>,
    ) -> FabricResult<Vec<IndicatorValue>> {
        let Some(id) = self.symbol_id(symbol).await? else {
            return Ok(Vec::new());
        };

        let mut sql = String::from(
            "SELECT indicator_type, date, parameter_fingerprint, value \
             FROM indicators WHERE symbol_id = $1",
        );
        if indicator_type.is_some() {
            sql.push_str(" AND indicator_type = $2");
        }
        if since.is_some() {
            sql.push_str(if indicator_type.is_some() {
                " AND date >= $3"
            } else {
                " AND date >= $2"
            });
        }
        sql.push_str(" ORDER BY date DESC, indicator_type ASC");

        let mut query = sqlx::query(&sql).bind(id);
        if let Some(kind) = indicator_type {
            query = query.bind(kind);
        }
        if let Some(date) = since {
            query = query.bind(date);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                Ok(IndicatorValue {
                    indicator_type: row.try_get("indicator_type")?,
                    date: row.try_get("date")?,
                    parameter_fingerprint: row.try_get("parameter_fingerprint")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn upsert_indicators(
        &self,
        symbol: &str,
        rows: &[IndicatorValue],
    ) -> FabricResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let id = self.require_symbol_id(symbol).await?;

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(BATCH_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO indicators (symbol_id, indicator_type, date, \
                 parameter_fingerprint, value) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(id)
                    .push_bind(&row.indicator_type)
                    .push_bind(row.date)
                    .push_bind(&row.parameter_fingerprint)
                    .push_bind(row.value);
            });
            builder.push(
                " ON CONFLICT (symbol_id, indicator_type, date, parameter_fingerprint) \
                 DO UPDATE SET value = EXCLUDED.value",
            );
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    async fn get_corporate_actions(&self, symbol: &str) -> FabricResult<Vec<CorporateAction>> {
        let Some(id) = self.symbol_id(symbol).await? else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            "SELECT action_date, action_type, split_ratio, dividend_amount, adjustment_factor \
             FROM corporate_actions WHERE symbol_id = $1 ORDER BY action_date ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let raw_kind: String = row.try_get("action_type")?;
                let kind = ActionKind::parse(&raw_kind).ok_or_else(|| {
                    FabricError::Internal(format!("unknown corporate action type: {}", raw_kind))
                })?;
                Ok(CorporateAction {
                    action_date: row.try_get("action_date")?,
                    kind,
                    split_ratio: row.try_get("split_ratio")?,
                    dividend_amount: row.try_get("dividend_amount")?,
                    adjustment_factor: row.try_get("adjustment_factor")?,
                })
            })
            .collect()
    }

    async fn upsert_corporate_actions(
        &self,
        symbol: &str,
        actions: &[CorporateAction],
    ) -> FabricResult<usize> {
        if actions.is_empty() {
            return Ok(0);
        }
        let id = self.require_symbol_id(symbol).await?;

        let mut tx = self.pool.begin().await?;
        for chunk in actions.chunks(BATCH_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO corporate_actions (symbol_id, action_date, action_type, \
                 split_ratio, dividend_amount, adjustment_factor) ",
            );
            builder.push_values(chunk, |mut b, action| {
                b.push_bind(id)
                    .push_bind(action.action_date)
                    .push_bind(action.kind.as_str())
                    .push_bind(action.split_ratio)
                    .push_bind(action.dividend_amount)
                    .push_bind(action.adjustment_factor);
            });
            builder.push(
                " ON CONFLICT (symbol_id, action_date, action_type) DO UPDATE SET \
                 split_ratio = EXCLUDED.split_ratio, \
                 dividend_amount = EXCLUDED.dividend_amount, \
                 adjustment_factor = EXCLUDED.adjustment_factor",
            );
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(actions.len())
    }

    async fn get_fx_rate(&self, from: &str, to: &str) -> FabricResult<Option<FxRate>> {
        let row = sqlx::query(
            "SELECT from_currency, to_currency, rate, source_rate, expires_at, data_source \
             FROM fx_rates WHERE from_currency = $1 AND to_currency = $2 AND expires_at > NOW()",
        )
        .bind(normalize_symbol(from))
        .bind(normalize_symbol(to))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(fx_from_row).transpose()
    }

    async fn get_fx_rate_raw(&self, from: &str, to: &str) -> FabricResult<Option<FxRate>> {
        let row = sqlx::query(
            "SELECT from_currency, to_currency, rate, source_rate, expires_at, data_source \
             FROM fx_rates WHERE from_currency = $1 AND to_currency = $2",
        )
        .bind(normalize_symbol(from))
        .bind(normalize_symbol(to))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(fx_from_row).transpose()
    }

    async fn upsert_fx_rate(&self, rate: &FxRate) -> FabricResult<()> {
        let from = normalize_symbol(&rate.from_currency);
        let to = normalize_symbol(&rate.to_currency);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO fx_rates (from_currency, to_currency, rate, source_rate, expires_at, data_source)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (from_currency, to_currency) DO UPDATE SET
                rate = EXCLUDED.rate,
                source_rate = EXCLUDED.source_rate,
                expires_at = EXCLUDED.expires_at,
                data_source = EXCLUDED.data_source
            "#,
        )
        .bind(&from)
        .bind(&to)
        .bind(rate.rate)
        .bind(rate.source_rate)
        .bind(rate.expires_at)
        .bind(&rate.data_source)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO fx_rate_history (from_currency, to_currency, rate, recorded_at, data_source) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&from)
        .bind(&to)
        .bind(rate.rate)
        .bind(Utc::now())
        .bind(&rate.data_source)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fx_rate_history(
        &self,
        from: &str,
        to: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FabricResult<Vec<FxRateSample>> {
        let rows = sqlx::query(
            "SELECT rate, recorded_at, data_source FROM fx_rate_history \
             WHERE from_currency = $1 AND to_currency = $2 \
               AND recorded_at >= $3 AND recorded_at <= $4 \
             ORDER BY recorded_at ASC",
        )
        .bind(normalize_symbol(from))
        .bind(normalize_symbol(to))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(FxRateSample {
                    rate: row.try_get("rate")?,
                    recorded_at: row.try_get("recorded_at")?,
                    data_source: row.try_get("data_source")?,
                })
            })
            .collect()
    }

    async fn reap_expired_fx_rates(&self) -> FabricResult<u64> {
        let result = sqlx::query("DELETE FROM fx_rates WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn is_cache_valid(&self, key: &str) -> FabricResult<bool> {
        let row = sqlx::query(
            "SELECT 1 AS hit FROM cache_metadata WHERE cache_key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn touch_cache(&self, key: &str, class: DataClass, ttl: Duration) -> FabricResult<()> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| FabricError::Internal(format!("ttl out of range: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO cache_metadata (cache_key, data_class, expires_at, access_count, last_accessed)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (cache_key) DO UPDATE SET
                data_class = EXCLUDED.data_class,
                expires_at = EXCLUDED.expires_at,
                access_count = cache_metadata.access_count + 1,
                last_accessed = EXCLUDED.last_accessed
            "#,
        )
        .bind(key)
        .bind(class.as_str())
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cache_entry(&self, key: &str) -> FabricResult<Option<CacheEntryMeta>> {
        let row = sqlx::query(
            "SELECT cache_key, data_class, expires_at, access_count, last_accessed \
             FROM cache_metadata WHERE cache_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let raw_class: String = row.try_get("data_class")?;
            Ok(CacheEntryMeta {
                cache_key: row.try_get("cache_key")?,
                data_class: DataClass::parse(&raw_class),
                expires_at: row.try_get("expires_at")?,
                access_count: row.try_get("access_count")?,
                last_accessed: row.try_get("last_accessed")?,
            })
        })
        .transpose()
    }

    async fn delete_cache_entry(&self, key: &str) -> FabricResult<()> {
        sqlx::query("DELETE FROM cache_metadata WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_cache_metadata(&self) -> FabricResult<u64> {
        let result = sqlx::query("DELETE FROM cache_metadata")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn reap_expired_cache(&self) -> FabricResult<u64> {
        let result = sqlx::query("DELETE FROM cache_metadata WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn record_fetch(&self, symbol: &str, source: &str, rows: u64) -> FabricResult<()> {
        sqlx::query(
            "INSERT INTO fetch_log (symbol, data_source, row_count, fetched_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(normalize_symbol(symbol))
        .bind(source)
        .bind(rows as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_snapshot(&self) -> HealthSnapshot {
        let counts = async {
            let symbols: i64 = sqlx::query("SELECT COUNT(*) AS n FROM symbols")
                .fetch_one(&self.pool)
                .await?
                .get("n");
            let bars: i64 = sqlx::query("SELECT COUNT(*) AS n FROM bars")
                .fetch_one(&self.pool)
                .await?
                .get("n");
            let last_updated: Option<DateTime<Utc>> =
                sqlx::query("SELECT MAX(fetched_at) AS latest FROM fetch_log")
                    .fetch_one(&self.pool)
                    .await?
                    .try_get("latest")
                    .unwrap_or(None);
            Ok::<_, sqlx::Error>((symbols, bars, last_updated))
        };

        match counts.await {
            Ok((symbols, bars, last_updated)) => HealthSnapshot {
                healthy: true,
                connection: "connected".to_string(),
                stats: StoreStats {
                    symbols: symbols as u64,
                    bars: bars as u64,
                },
                last_updated,
                timestamp: Utc::now(),
            },
            Err(e) => {
                warn!("health snapshot failed: {}", e);
                HealthSnapshot::degraded(&e.to_string())
            }
        }
    }
}
