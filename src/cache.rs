//! TTL cache for expensive shell probes.
//!
//! Each collector owns one [`TtlCache`]. The lock is only held while reading or
//! writing an entry, never across a fetch, so two concurrent misses on the same
//! key may both fetch. Failed fetches are not cached.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_millis(60_000);

#[derive(Clone)]
pub struct CacheEntry {
    pub data: Arc<dyn Any + Send + Sync>,
    pub timestamp: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.timestamp) < self.ttl
    }
}

pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    disabled: bool,
}

impl TtlCache {
    pub fn new(default_ttl: Duration, disabled: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            disabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(DEFAULT_TTL, true)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the cached value for `key` if it is still fresh, otherwise run
    /// `fetch`, store a successful result and return it.
    ///
    /// `ttl` overrides the cache-wide default for this key.
    pub async fn get_cached_or_fresh<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.disabled {
            return fetch().await;
        }

        if let Some(hit) = self.get::<T>(key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        debug!(key, "cache miss");
        let value = fetch().await?;
        self.insert(key, value.clone(), ttl.unwrap_or(self.default_ttl));
        Ok(value)
    }

    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if !entry.is_fresh(Instant::now()) {
            return None;
        }
        entry.data.downcast_ref::<T>().cloned()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration) {
        if self.disabled {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key.to_string(),
                CacheEntry {
                    data: Arc::new(value),
                    timestamp: Instant::now(),
                    ttl,
                },
            );
        }
    }

    /// Drop one key, or every key when `key` is `None`.
    pub fn clear(&self, key: Option<&str>) {
        if let Ok(mut entries) = self.entries.lock() {
            match key {
                Some(key) => {
                    entries.remove(key);
                }
                None => entries.clear(),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn second_read_within_ttl_is_served_from_cache() {
        let cache = TtlCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<Vec<u16>, ()> = cache
                .get_cached_or_fresh("ports", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![22, 80])
                })
                .await;
            assert_eq!(value.unwrap(), vec![22, 80]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let cache = TtlCache::default();
        cache.insert("k", 1u32, Duration::from_millis(0));

        let value: Result<u32, ()> = cache
            .get_cached_or_fresh("k", None, || async { Ok(2) })
            .await;
        assert_eq!(value.unwrap(), 2);
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let cache = TtlCache::disabled();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Result<u8, ()> = cache
                .get_cached_or_fresh("k", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = TtlCache::default();
        let first: Result<u8, &str> = cache
            .get_cached_or_fresh("k", None, || async { Err("boom") })
            .await;
        assert!(first.is_err());

        let second: Result<u8, &str> = cache
            .get_cached_or_fresh("k", None, || async { Ok(7) })
            .await;
        assert_eq!(second.unwrap(), 7);
    }

    #[test]
    fn clear_removes_single_key_or_everything() {
        let cache = TtlCache::default();
        cache.insert("a", 1u8, DEFAULT_TTL);
        cache.insert("b", 2u8, DEFAULT_TTL);

        cache.clear(Some("a"));
        assert_eq!(cache.get::<u8>("a"), None);
        assert_eq!(cache.get::<u8>("b"), Some(2));

        cache.clear(None);
        assert!(cache.is_empty());
    }
}
