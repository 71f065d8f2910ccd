//! Environment-driven configuration.
//!
//! The fabric reads its runtime shape from the environment, the same way the
//! rest of the deployment is wired:
//!
//! - `STORAGE_MODE`: `embedded` (single-file SQLite) or `hosted` (Postgres)
//! - `DATABASE_URL`: SQLite path/URL or Postgres connection string
//! - `REDIS_URL`: enables the distributed cache tier when set
//! - `MARKET_DATA_API_KEY`: selects the live daily-series source
//! - `FX_API_KEY`: key for the keyed FX providers
//! - `FX_ENABLED`: `true`/`false`, default true
//! - `CACHE_MAX_ENTRIES`: optional in-process entry cap
//! - `MAINTENANCE_INTERVAL_SECS`: background reaper period, default 3600
//! - `SYNTHESIZE_OHLC`: synthesize open/high/low for close-only sources,
//!   default true
//! - `PROVIDER_TIMEOUT_SECS`: per-request upstream timeout, default 5

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};

/// Which persistent-store variant to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Single-file SQLite store, local to the process
    Embedded,
    /// Remote Postgres store shared across processes
    Hosted,
}

impl StorageMode {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "embedded" | "sqlite" => Some(StorageMode::Embedded),
            "hosted" | "postgres" => Some(StorageMode::Hosted),
            _ => None,
        }
    }
}

/// Runtime configuration for the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mode: StorageMode,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub market_api_key: Option<String>,
    pub fx_api_key: Option<String>,
    pub fx_enabled: bool,
    pub max_memory_entries: Option<usize>,
    pub maintenance_interval_secs: u64,
    pub synthesize_ohlc: bool,
    pub provider_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Embedded,
            database_url: "sqlite://stockline.db?mode=rwc".to_string(),
            redis_url: None,
            market_api_key: None,
            fx_api_key: None,
            fx_enabled: true,
            max_memory_entries: None,
            maintenance_interval_secs: 3600,
            synthesize_ohlc: true,
            provider_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> FabricResult<Self> {
        let defaults = Self::default();

        let mode = match env::var("STORAGE_MODE") {
            Ok(raw) => StorageMode::from_str(&raw).ok_or_else(|| {
                FabricError::Config(format!(
                    "STORAGE_MODE must be 'embedded' or 'hosted', got '{}'",
                    raw
                ))
            })?,
            Err(_) => defaults.mode,
        };

        let config = Self {
            mode,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            market_api_key: env::var("MARKET_DATA_API_KEY").ok().filter(|s| !s.is_empty()),
            fx_api_key: env::var("FX_API_KEY").ok().filter(|s| !s.is_empty()),
            fx_enabled: env_bool("FX_ENABLED", defaults.fx_enabled),
            max_memory_entries: env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok()),
            maintenance_interval_secs: env::var("MAINTENANCE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.maintenance_interval_secs),
            synthesize_ohlc: env_bool("SYNTHESIZE_OHLC", defaults.synthesize_ohlc),
            provider_timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.provider_timeout_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> FabricResult<()> {
        if self.database_url.is_empty() {
            return Err(FabricError::Config("DATABASE_URL cannot be empty".to_string()));
        }
        match self.mode {
            StorageMode::Hosted if !self.database_url.starts_with("postgres") => {
                Err(FabricError::Config(
                    "hosted mode requires a postgres:// DATABASE_URL".to_string(),
                ))
            }
            StorageMode::Embedded if self.database_url.starts_with("postgres") => {
                Err(FabricError::Config(
                    "embedded mode cannot use a postgres:// DATABASE_URL".to_string(),
                ))
            }
            _ => {
                if self.maintenance_interval_secs == 0 {
                    return Err(FabricError::Config(
                        "MAINTENANCE_INTERVAL_SECS must be positive".to_string(),
                    ));
                }
                if self.provider_timeout_secs == 0 {
                    return Err(FabricError::Config(
                        "PROVIDER_TIMEOUT_SECS must be positive".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
