//! Best-effort cache tier in front of the store.
//!
//! A cache may lose any entry at any time; callers treat every failure as a
//! miss. Values are the compact ranker encoding from [`crate::codec`].

use moka::future::Cache as MokaCache;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// A namespaced byte cache.
#[allow(async_fn_in_trait)]
pub trait Cache: Send + Sync {
    /// Look up several keys at once. Missing keys are absent from the map.
    async fn get_multi(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> HashMap<String, Vec<u8>>;

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>);

    async fn delete(&self, namespace: &str, key: &str);
}

type Slot = (String, String);

/// An in-process [`Cache`] with optional expiry and size bound.
pub struct MemoryCache {
    entries: MokaCache<Slot, Vec<u8>>,
    ttl: Option<Duration>,
    max_entries: Option<u64>,
}

impl MemoryCache {
    /// An unbounded cache whose entries never expire.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    fn build(ttl: Option<Duration>, max_entries: Option<u64>) -> Self {
        let mut builder = MokaCache::<Slot, Vec<u8>>::builder();
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        if let Some(max_entries) = max_entries {
            builder = builder.max_capacity(max_entries);
        }
        Self { entries: builder.build(), ttl, max_entries }
    }

    /// Expire entries `ttl` after they were stored.
    pub fn with_ttl(self, ttl: Duration) -> Self {
        Self::build(Some(ttl), self.max_entries)
    }

    /// Keep at most `max_entries`.
    pub fn with_max_entries(self, max_entries: usize) -> Self {
        Self::build(self.ttl, Some(max_entries as u64))
    }

    /// Number of live entries, after pending evictions are applied.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

impl Cache for MemoryCache {
    async fn get_multi(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> HashMap<String, Vec<u8>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let slot = (namespace.to_string(), key.clone());
            if let Some(value) = self.entries.get(&slot).await {
                found.insert(key.clone(), value);
            }
        }
        found
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) {
        self.entries
            .insert((namespace.to_string(), key.to_string()), value)
            .await;
    }

    async fn delete(&self, namespace: &str, key: &str) {
        self.entries
            .invalidate(&(namespace.to_string(), key.to_string()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_and_get_multi() {
        let cache = MemoryCache::new();
        cache.set("ns", "a", vec![1]).await;
        cache.set("ns", "b", vec![2]).await;

        let found = cache.get_multi("ns", &keys(&["a", "b", "c"])).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], vec![1]);
        assert!(!found.contains_key("c"));
    }

    #[tokio::test]
    async fn test_namespaces_do_not_overlap() {
        let cache = MemoryCache::new();
        cache.set("result_ranker", "a", vec![1]).await;

        let found = cache.get_multi("result_ranker_next", &keys(&["a"])).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = MemoryCache::new();
        cache.set("ns", "a", vec![1]).await;
        cache.delete("ns", "a").await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = MemoryCache::new().with_ttl(Duration::from_millis(10));
        cache.set("ns", "a", vec![1]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get_multi("ns", &keys(&["a"])).await.is_empty());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_max_entries_bounds_size() {
        let cache = MemoryCache::new().with_max_entries(2);
        for key in ["a", "b", "c", "d"] {
            cache.set("ns", key, vec![1]).await;
        }
        assert!(cache.len().await <= 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped_without_reads() {
        let cache = MemoryCache::new().with_ttl(Duration::from_millis(10));
        for key in ["a", "b", "c"] {
            cache.set("ns", key, vec![1]).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.len().await, 0);
    }
}
