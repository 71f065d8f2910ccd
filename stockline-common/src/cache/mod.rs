//! Cache tier manager.
//!
//! The three-tier read path: in-process map, optional distributed Redis
//! tier, then the persistent freshness ledger in storage. Values live in the
//! first two tiers; the persistent tier only vouches for freshness — callers
//! reconstruct values from the entity tables when the ledger reports a hit.
//!
//! Writes go through all configured tiers; a redis outage degrades with a
//! warning while storage errors surface to the caller.

mod memory;
mod redis;
mod singleflight;

pub use memory::{MemoryCache, MemoryLookup};
pub use redis::RedisCache;
pub use singleflight::SingleFlight;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{FabricError, FabricResult};
use crate::keys::DataClass;
use crate::storage::StorageBackend;

/// Result of a tiered lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome {
    /// A value tier held the entry; carries the serialized value
    Hit(String),
    /// The persistent ledger vouches for the key; rebuild from entities
    Fresh,
    /// Nothing usable anywhere
    Miss,
}

#[derive(Debug, Default)]
struct CacheCounters {
    memory_hits: AtomicU64,
    distributed_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

/// Immutable snapshot of the manager's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub distributed_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub sets: u64,
    pub deletes: u64,
    pub entries: usize,
    pub max_entries: Option<usize>,
    pub hit_rate: f64,
}

/// Orchestrates the cache tiers and owns all cache counters.
pub struct CacheManager {
    memory: MemoryCache,
    redis: Option<RedisCache>,
    storage: Arc<dyn StorageBackend>,
    counters: CacheCounters,
    max_entries: Option<usize>,
}

impl CacheManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        redis: Option<RedisCache>,
        max_entries: Option<usize>,
    ) -> Self {
        Self {
            memory: MemoryCache::new(),
            redis,
            storage,
            counters: CacheCounters::default(),
            max_entries,
        }
    }

    /// Tiered lookup per the read-path contract.
    ///
    /// A `StorageUnavailable` during the ledger check degrades to `Miss`:
    /// the memory tier has already had its chance to serve, and a miss sends
    /// the caller down the populate path where the outage will surface if it
    /// still matters.
    pub async fn get(&self, key: &str) -> FabricResult<CacheOutcome> {
        match self.memory.get(key) {
            MemoryLookup::Live(value) => {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                debug!("memory hit for {}", key);
                return Ok(CacheOutcome::Hit(value));
            }
            MemoryLookup::Expired => {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
            MemoryLookup::Absent => {}
        }

        if let Some(redis) = &self.redis {
            match redis.get_with_ttl(key).await {
                Ok(Some((value, remaining))) => {
                    self.counters.distributed_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("distributed hit for {}", key);
                    // Backfill the faster tier for the remainder of the TTL
                    self.memory
                        .insert(key, value.clone(), DataClass::Unknown, remaining);
                    return Ok(CacheOutcome::Hit(value));
                }
                Ok(None) => {}
                Err(e) => warn!("distributed tier lookup failed for {}: {}", key, e),
            }
        }

        match self.storage.is_cache_valid(key).await {
            Ok(true) => {
                self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
                debug!("persistent ledger hit for {}", key);
                Ok(CacheOutcome::Fresh)
            }
            Ok(false) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(CacheOutcome::Miss)
            }
            Err(FabricError::StorageUnavailable(msg)) => {
                warn!("ledger check degraded to miss for {}: {}", key, msg);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(CacheOutcome::Miss)
            }
            Err(e) => Err(e),
        }
    }

    /// Write-through set: memory, redis (best-effort), then ledger metadata.
    pub async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        class: DataClass,
    ) -> FabricResult<()> {
        self.memory.insert(key, value.clone(), class, ttl);
        self.counters.sets.fetch_add(1, Ordering::Relaxed);

        if let Some(max) = self.max_entries {
            let evicted = self.memory.evict_to(max);
            if evicted > 0 {
                self.counters
                    .evictions
                    .fetch_add(evicted as u64, Ordering::Relaxed);
            }
        }

        if let Some(redis) = &self.redis {
            if let Err(e) = redis.set(key, &value, ttl).await {
                warn!("distributed tier set failed for {}: {}", key, e);
            }
        }

        self.storage.touch_cache(key, class, ttl).await
    }

    /// Serialize and store a typed value.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        class: DataClass,
    ) -> FabricResult<()> {
        let serialized = serde_json::to_string(value)?;
        self.set(key, serialized, ttl, class).await
    }

    /// Remove a key from every tier.
    pub async fn delete(&self, key: &str) -> FabricResult<()> {
        self.memory.remove(key);
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);

        if let Some(redis) = &self.redis {
            if let Err(e) = redis.delete(key).await {
                warn!("distributed tier delete failed for {}: {}", key, e);
            }
        }

        self.storage.delete_cache_entry(key).await
    }

    /// Empty the in-process tier and truncate the ledger.
    pub async fn clear(&self) -> FabricResult<u64> {
        let memory_cleared = self.memory.clear() as u64;

        if let Some(redis) = &self.redis {
            if let Err(e) = redis.clear().await {
                warn!("distributed tier clear failed: {}", e);
            }
        }

        let ledger_cleared = self.storage.clear_cache_metadata().await?;
        debug!(
            "cache cleared: {} memory entries, {} ledger rows",
            memory_cleared, ledger_cleared
        );
        Ok(memory_cleared.max(ledger_cleared))
    }

    /// Evict least-recently-used memory entries down to `max`.
    pub fn enforce_max_entries(&self, max: usize) -> usize {
        let evicted = self.memory.evict_to(max);
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Drop expired memory entries (maintenance); counts as evictions.
    pub fn purge_expired(&self) -> usize {
        let purged = self.memory.purge_expired();
        if purged > 0 {
            self.counters
                .evictions
                .fetch_add(purged as u64, Ordering::Relaxed);
        }
        purged
    }

    /// Immutable counter snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let distributed_hits = self.counters.distributed_hits.load(Ordering::Relaxed);
        let persistent_hits = self.counters.persistent_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let hits = memory_hits + distributed_hits + persistent_hits;
        let total = hits + misses;

        CacheStatsSnapshot {
            memory_hits,
            distributed_hits,
            persistent_hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            entries: self.memory.len(),
            max_entries: self.max_entries,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Direct access to the memory tier (tests).
    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }
}
