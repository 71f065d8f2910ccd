//! In-process cache tier.
//!
//! A TTL-governed map with last-access bookkeeping for LRU enforcement.
//! Reads, expiry checks and touch-on-access happen under one lock
//! acquisition so they are atomic with respect to eviction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::keys::DataClass;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    class: DataClass,
    expires_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

/// Result of a memory-tier lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryLookup {
    /// Present and unexpired; carries the stored value
    Live(String),
    /// Was present but expired; the entry has been removed
    Expired,
    /// No entry for the key
    Absent,
}

/// Thread-safe in-process entry map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a key; live entries are touched, expired entries are dropped.
    pub fn get(&self, key: &str) -> MemoryLookup {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.last_accessed = now;
                entry.access_count += 1;
                MemoryLookup::Live(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                MemoryLookup::Expired
            }
            None => MemoryLookup::Absent,
        }
    }

    /// Insert or replace an entry with `expires_at = now + ttl`.
    pub fn insert(&self, key: &str, value: String, class: DataClass, ttl: Duration) {
        let now = Instant::now();
        let entry = MemoryEntry {
            value,
            class,
            expires_at: now + ttl,
            last_accessed: now,
            access_count: 0,
        };
        self.entries.write().insert(key.to_string(), entry);
    }

    /// Remove one entry; true when something was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop everything; returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every expired entry; returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    /// Evict least-recently-used entries until at most `max` remain.
    /// Returns the number evicted.
    pub fn evict_to(&self, max: usize) -> usize {
        let mut entries = self.entries.write();
        if entries.len() <= max {
            return 0;
        }
        let excess = entries.len() - max;

        let mut by_access: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_accessed))
            .collect();
        by_access.sort_by_key(|(_, accessed)| *accessed);

        for (key, _) in by_access.into_iter().take(excess) {
            entries.remove(&key);
        }
        excess
    }

    /// Access count for a key (tests and metrics).
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.entries.read().get(key).map(|e| e.access_count)
    }

    /// Data class recorded for a key.
    pub fn class_of(&self, key: &str) -> Option<DataClass> {
        self.entries.read().get(key).map(|e| e.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_within_ttl_returns_value() {
        let cache = MemoryCache::new();
        cache.insert("k", "v".to_string(), DataClass::Analysis, Duration::from_secs(60));
        assert_eq!(cache.get("k"), MemoryLookup::Live("v".to_string()));
    }

    #[test]
    fn test_expired_entry_is_removed_on_access() {
        let cache = MemoryCache::new();
        cache.insert("k", "v".to_string(), DataClass::Ohlcv, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), MemoryLookup::Expired);
        // Second access sees nothing at all
        assert_eq!(cache.get("k"), MemoryLookup::Absent);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_purge_expired_counts() {
        let cache = MemoryCache::new();
        cache.insert("a", "1".to_string(), DataClass::Fx, Duration::from_millis(0));
        cache.insert("b", "2".to_string(), DataClass::Fx, Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_to_drops_least_recently_used() {
        let cache = MemoryCache::new();
        for i in 0..5 {
            cache.insert(&format!("k{}", i), i.to_string(), DataClass::Ohlcv, Duration::from_secs(60));
            std::thread::sleep(Duration::from_millis(2));
        }
        // Touch k0 so it becomes most recently used
        cache.get("k0");

        assert_eq!(cache.evict_to(2), 3);
        assert_eq!(cache.len(), 2);
        assert!(matches!(cache.get("k0"), MemoryLookup::Live(_)));
        assert!(matches!(cache.get("k4"), MemoryLookup::Live(_)));
        assert_eq!(cache.get("k1"), MemoryLookup::Absent);
    }

    #[test]
    fn test_access_count_increments() {
        let cache = MemoryCache::new();
        cache.insert("k", "v".to_string(), DataClass::Analysis, Duration::from_secs(60));
        cache.get("k");
        cache.get("k");
        assert_eq!(cache.access_count("k"), Some(2));
    }
}
