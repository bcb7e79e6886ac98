// Copyright 2025 Cowboy AI, LLC.

//! Cached totals for offset pagination
//!
//! Counting every matching row on every page is linear in the match set.
//! The cache keeps recent totals per predicate for a short TTL; totals served
//! from it can lag concurrent writes by up to that TTL.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::CountCacheConfig;
use crate::persistence::filter::CompiledPredicate;

#[derive(Debug, Clone, Copy)]
struct CachedCount {
    total: u64,
    stored_at: Instant,
}

/// TTL-bounded LRU cache of predicate totals
#[derive(Debug)]
pub struct CountCache {
    entries: Mutex<LruCache<String, CachedCount>>,
    ttl: Duration,
}

impl CountCache {
    /// Build a cache from config; `None` when caching is disabled
    pub fn from_config(config: &CountCacheConfig) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        let capacity = NonZeroUsize::new(config.capacity)?;
        Some(Self::new(capacity, config.ttl()))
    }

    /// Create a cache
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fresh total for a predicate, if one is cached
    pub async fn get(&self, predicate: &CompiledPredicate) -> Option<u64> {
        let key = predicate.cache_key();
        let mut entries = self.entries.lock().await;
        match entries.get(&key).copied() {
            Some(cached) if cached.stored_at.elapsed() < self.ttl => Some(cached.total),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    /// Remember a freshly computed total
    pub async fn put(&self, predicate: &CompiledPredicate, total: u64) {
        let mut entries = self.entries.lock().await;
        entries.put(
            predicate.cache_key(),
            CachedCount {
                total,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every cached total
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::filter::FilterCompiler;
    use crate::persistence::query_support::QueryBuilder;
    use crate::EventStatus;

    fn predicate(status: EventStatus) -> CompiledPredicate {
        FilterCompiler::compile(&QueryBuilder::new().status(status).build().filter).unwrap()
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(CountCache::from_config(&CountCacheConfig::default()).is_none());
        let config = CountCacheConfig {
            ttl_seconds: 30,
            capacity: 8,
        };
        assert!(CountCache::from_config(&config).is_some());
    }

    #[tokio::test]
    async fn test_hit_per_predicate() {
        let cache = CountCache::new(NonZeroUsize::new(4).unwrap(), Duration::from_secs(60));
        let failed = predicate(EventStatus::Failed);
        let pending = predicate(EventStatus::Pending);

        cache.put(&failed, 12).await;
        assert_eq!(cache.get(&failed).await, Some(12));
        assert_eq!(cache.get(&pending).await, None);

        cache.clear().await;
        assert_eq!(cache.get(&failed).await, None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache = CountCache::new(NonZeroUsize::new(4).unwrap(), Duration::from_millis(10));
        let failed = predicate(EventStatus::Failed);

        cache.put(&failed, 3).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get(&failed).await, None);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let cache = CountCache::new(NonZeroUsize::new(1).unwrap(), Duration::from_secs(60));
        let failed = predicate(EventStatus::Failed);
        let pending = predicate(EventStatus::Pending);

        cache.put(&failed, 1).await;
        cache.put(&pending, 2).await;
        assert_eq!(cache.get(&failed).await, None);
        assert_eq!(cache.get(&pending).await, Some(2));
    }
}
