//! Expiring key/value cache
//!
//! Backed by `moka::sync::Cache`, which keeps reads lock-free and evicts
//! expired entries on its own. Used by remote repositories for the
//! missed-retrieval cache (negative results) and the remote listing cache.

use moka::sync::Cache;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Expiring cache with a fixed per-instance TTL
///
/// A TTL of zero or less disables expiry: entries live until removed.
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    name: String,
    ttl_secs: i64,
    cache: Cache<K, V>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an unbounded cache
    pub fn new(name: impl Into<String>, ttl_secs: i64) -> Self {
        Self::with_capacity(name, ttl_secs, None)
    }

    /// Create a cache holding at most `max_capacity` entries
    pub fn with_capacity(name: impl Into<String>, ttl_secs: i64, max_capacity: Option<u64>) -> Self {
        let name = name.into();
        let mut builder = Cache::builder().name(&name);
        if ttl_secs > 0 {
            builder = builder.time_to_live(Duration::from_secs(ttl_secs as u64));
        }
        if let Some(max) = max_capacity {
            builder = builder.max_capacity(max);
        }

        Self {
            name,
            ttl_secs,
            cache: builder.build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.cache.get(key);
        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    pub fn put(&self, key: K, value: V) {
        self.cache.insert(key, value);
    }

    pub fn remove(&self, key: &K) {
        self.cache.invalidate(key);
    }

    /// Remove every entry whose key matches `predicate`
    pub fn remove_where(&self, predicate: impl Fn(&K) -> bool) {
        let doomed: Vec<_> = self
            .cache
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key)
            .collect();
        for key in doomed {
            self.cache.invalidate(key.as_ref());
        }
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Approximate number of live entries
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 60);
        assert!(cache.get(&"a".to_string()).is_none());

        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        cache.remove(&"a".to_string());
        assert!(cache.get(&"a".to_string()).is_none());
        assert_eq!(cache.stats(), (1, 2));
    }

    #[test]
    fn test_remove_where() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 60);
        cache.put("org/acme/a".to_string(), 1);
        cache.put("org/acme/b".to_string(), 2);
        cache.put("com/other/c".to_string(), 3);

        cache.remove_where(|k| k.starts_with("org/acme"));
        assert!(cache.get(&"org/acme/a".to_string()).is_none());
        assert!(cache.get(&"org/acme/b".to_string()).is_none());
        assert_eq!(cache.get(&"com/other/c".to_string()), Some(3));
    }

    #[test]
    fn test_clear() {
        let cache: TtlCache<u32, u32> = TtlCache::new("test", 0);
        for i in 0..10 {
            cache.put(i, i);
        }
        assert_eq!(cache.len(), 10);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: TtlCache<u32, u32> = TtlCache::new("test", 1);
        cache.put(1, 1);
        assert_eq!(cache.get(&1), Some(1));
        std::thread::sleep(Duration::from_millis(1200));
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn test_non_positive_ttl_never_expires() {
        let cache: TtlCache<u32, u32> = TtlCache::new("forever", -1);
        cache.put(1, 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get(&1), Some(1));
    }
}
