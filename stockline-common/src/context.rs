//! Application context: explicit dependency wiring.
//!
//! Construction replaces process-wide singletons: every component receives
//! its collaborators at build time and the lifecycle is
//! `init → serve → drain → close`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{CacheManager, RedisCache};
use crate::config::AppConfig;
use crate::error::FabricResult;
use crate::fx::{default_provider_chain, FxService};
use crate::maintenance::{MaintenanceHandle, MaintenanceLoop};
use crate::orchestrator::{Analyzer, AnalyzerSettings};
use crate::storage::{self, StorageBackend};
use crate::upstream::{AlphaDailySource, MarketDataSource, MockSource};

/// Fully wired fabric instance.
pub struct AppContext {
    pub config: AppConfig,
    pub storage: Arc<dyn StorageBackend>,
    pub cache: Arc<CacheManager>,
    /// `None` when the FX subsystem is disabled by configuration
    pub fx: Option<Arc<FxService>>,
    pub analyzer: Arc<Analyzer>,
    maintenance: Option<MaintenanceHandle>,
}

impl AppContext {
    /// Wire everything from configuration, selecting the upstream source by
    /// API-key presence.
    pub async fn init(config: AppConfig) -> FabricResult<Self> {
        let upstream: Arc<dyn MarketDataSource> = match &config.market_api_key {
            Some(key) => Arc::new(AlphaDailySource::new(key, config.provider_timeout())?),
            None => {
                warn!("no market data api key configured; using deterministic mock source");
                Arc::new(MockSource::new())
            }
        };
        Self::init_with_upstream(config, upstream).await
    }

    /// Wire everything with an explicit upstream source (tests, embedding).
    pub async fn init_with_upstream(
        config: AppConfig,
        upstream: Arc<dyn MarketDataSource>,
    ) -> FabricResult<Self> {
        config.validate()?;

        let storage = storage::connect(&config).await?;

        let redis = match &config.redis_url {
            Some(url) => Some(RedisCache::connect(url)?),
            None => None,
        };
        let cache = Arc::new(CacheManager::new(
            Arc::clone(&storage),
            redis,
            config.max_memory_entries,
        ));

        let fx = if config.fx_enabled {
            let providers = default_provider_chain(
                config.fx_api_key.as_deref(),
                config.provider_timeout(),
            )?;
            Some(Arc::new(FxService::new(Arc::clone(&storage), providers)))
        } else {
            None
        };

        let settings = AnalyzerSettings {
            synthesize_ohlc: config.synthesize_ohlc,
            ..Default::default()
        };
        let analyzer = Arc::new(Analyzer::new(
            Arc::clone(&storage),
            Arc::clone(&cache),
            upstream,
            settings,
        ));

        info!("fabric context initialized (mode: {:?})", config.mode);
        Ok(Self {
            config,
            storage,
            cache,
            fx,
            analyzer,
            maintenance: None,
        })
    }

    /// Start the background maintenance loop; idempotent.
    pub fn start_maintenance(&mut self) {
        if self.maintenance.is_some() {
            return;
        }
        let maintenance = MaintenanceLoop::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.storage),
            self.config.maintenance_interval(),
        );
        self.maintenance = Some(maintenance.spawn());
    }

    /// Drain and release: stops maintenance; pools close on drop.
    pub async fn close(mut self) {
        if let Some(handle) = self.maintenance.take() {
            handle.shutdown().await;
        }
        info!("fabric context closed");
    }
}
