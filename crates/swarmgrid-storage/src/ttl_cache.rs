//! Short-lived set of recently seen keys.
//!
//! Used for pinned CIDs and connected peers. Entries expire after twice
//! the configured TTL. The cache is advisory: a miss only costs a redundant
//! call to the blob store, it never changes what gets published.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Default bound on tracked keys.
const DEFAULT_MAX_ENTRIES: usize = 4096;

pub struct TtlCache {
    entries: HashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
    stats: CacheStats,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            stats: CacheStats::default(),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Lifetime of an entry: twice the TTL.
    pub fn lifetime(&self) -> Duration {
        self.ttl * 2
    }

    /// Whether `key` was inserted within the last two TTLs.
    ///
    /// Expired entries are removed eagerly.
    pub fn contains(&mut self, key: &str) -> bool {
        let lifetime = self.lifetime();
        match self.entries.get(key) {
            Some(at) if at.elapsed() <= lifetime => {
                self.stats.hits += 1;
                true
            }
            Some(_) => {
                self.entries.remove(key);
                self.stats.misses += 1;
                self.stats.evictions += 1;
                tracing::debug!(%key, "cache entry expired");
                false
            }
            None => {
                self.stats.misses += 1;
                false
            }
        }
    }

    /// Insert or refresh a key.
    pub fn insert(&mut self, key: &str) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(key.to_string(), Instant::now());
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every expired entry, returning how many went.
    pub fn purge_expired(&mut self) -> usize {
        let lifetime = self.lifetime();
        let before = self.entries.len();
        self.entries.retain(|_, at| at.elapsed() <= lifetime);
        let purged = before - self.entries.len();
        self.stats.evictions += purged as u64;
        purged
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }

    /// Keys still alive.
    pub fn keys(&self) -> Vec<String> {
        let lifetime = self.lifetime();
        self.entries
            .iter()
            .filter(|(_, at)| at.elapsed() <= lifetime)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
