//! The ephemeral cache.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};

/// Configuration for the ephemeral cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied by [`EphemeralCache::set`] when none is given.
    /// `None` keeps entries until they are deleted or overwritten.
    pub default_ttl: Option<Duration>,
}

/// Cached value entry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a live entry.
    pub hits: u64,
    /// Number of reads that found nothing or an expired entry.
    pub misses: u64,
    /// Number of entries currently stored, including expired ones not yet removed.
    pub size: usize,
    /// Number of expired entries removed so far.
    pub expired: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

/// Process-local key/value store with optional per-key expiry.
///
/// Cheap to clone; every clone shares the same entries. Reads after expiry
/// are misses and writes are last-write-wins. The cache has no size bound and
/// is not persisted.
///
/// ```
/// use agora_cache::{EphemeralCache, ManualClock};
/// use serde_json::json;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let cache: EphemeralCache = EphemeralCache::with_clock(Arc::new(clock.clone()));
///
/// cache.set("greeting", json!("hello"), Some(Duration::from_secs(60)));
/// assert_eq!(cache.get("greeting"), Some(json!("hello")));
///
/// clock.advance(Duration::from_secs(60));
/// assert_eq!(cache.get("greeting"), None);
/// ```
pub struct EphemeralCache<V = Value> {
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    counters: Arc<Counters>,
    clock: Arc<dyn Clock>,
    default_ttl: Option<Duration>,
}

impl<V> Clone for EphemeralCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            counters: Arc::clone(&self.counters),
            clock: Arc::clone(&self.clock),
            default_ttl: self.default_ttl,
        }
    }
}

impl<V> std::fmt::Debug for EphemeralCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralCache")
            .field("len", &self.entries.len())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for EphemeralCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V: Clone + Send + Sync + 'static> EphemeralCache<V> {
    /// Creates a cache on the system clock.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_config_and_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache with no default TTL on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config_and_clock(CacheConfig::default(), clock)
    }

    /// Creates a cache with both a configuration and a clock.
    #[must_use]
    pub fn with_config_and_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            clock,
            default_ttl: config.default_ttl,
        }
    }

    /// Returns the value for `key`, or `None` if absent or expired.
    ///
    /// Expired entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let live = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match live {
            Some(Some(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                self.remove_if_expired(key, now);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// `ttl` of `None` falls back to the configured default TTL. A TTL too
    /// large to represent as an instant means the entry never expires.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let expires_at = self.expiry(self.clock.now(), ttl);
        self.entries.insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Stores `value` only if `key` holds no live entry. Returns `true` if it
    /// was stored.
    ///
    /// The check and the write happen under the key's shard lock, so of two
    /// concurrent callers for the same key exactly one wins.
    pub fn set_if_absent(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> bool {
        let now = self.clock.now();
        let entry = CacheEntry {
            value,
            expires_at: self.expiry(now, ttl),
        };
        match self.entries.entry(key.into()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return false;
                }
                occupied.insert(entry);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    /// Removes `key`. Returns `true` if a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now))
    }

    /// Returns `true` if `key` holds a live entry. Does not count as a read.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Removes and returns the live value for `key`.
    pub fn take(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .remove(key)
            .and_then(|(_, entry)| (!entry.is_expired(now)).then_some(entry.value))
    }

    /// Returns the keys of all live entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Removes all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.counters
                .expired
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            size: self.entries.len(),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    fn expiry(&self, now: Instant, ttl: Option<Duration>) -> Option<Instant> {
        ttl.or(self.default_ttl).and_then(|ttl| now.checked_add(ttl))
    }

    fn remove_if_expired(&self, key: &str, now: Instant) {
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl EphemeralCache<Value> {
    /// Reads a JSON entry and deserializes it into `T`.
    ///
    /// A value that does not fit `T` is treated as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Serializes `value` to JSON and stores it.
    pub fn set_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache_with_clock() -> (EphemeralCache, ManualClock) {
        let clock = ManualClock::new();
        (EphemeralCache::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_set_then_get() {
        let (cache, _clock) = cache_with_clock();
        cache.set("k", json!({ "v": 1 }), Some(Duration::from_secs(10)));
        assert_eq!(cache.get("k"), Some(json!({ "v": 1 })));
    }

    #[test]
    fn test_expiry_is_a_miss() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", json!(1), Some(Duration::from_secs(10)));

        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get("k"), Some(json!(1)));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.has("k"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", json!("forever"), None);
        clock.advance(Duration::from_secs(86_400 * 365));
        assert_eq!(cache.get("k"), Some(json!("forever")));
    }

    #[test]
    fn test_default_ttl_applies_when_none_given() {
        let clock = ManualClock::new();
        let cache: EphemeralCache = EphemeralCache::with_config_and_clock(
            CacheConfig {
                default_ttl: Some(Duration::from_secs(5)),
            },
            Arc::new(clock.clone()),
        );
        cache.set("default", json!(1), None);
        cache.set("explicit", json!(2), Some(Duration::from_secs(60)));

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.get("default"), None);
        assert_eq!(cache.get("explicit"), Some(json!(2)));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", json!(1), Some(Duration::from_secs(u64::MAX)));
        clock.advance(Duration::from_secs(86_400 * 365));
        assert_eq!(cache.get("k"), Some(json!(1)));

        let huge_default: EphemeralCache = EphemeralCache::new(CacheConfig {
            default_ttl: Some(Duration::MAX),
        });
        huge_default.set("k", json!(2), None);
        assert_eq!(huge_default.get("k"), Some(json!(2)));
    }

    #[test]
    fn test_set_if_absent() {
        let (cache, clock) = cache_with_clock();
        assert!(cache.set_if_absent("slot", json!("ada"), Some(Duration::from_secs(10))));
        assert!(!cache.set_if_absent("slot", json!("bob"), None));
        assert_eq!(cache.get("slot"), Some(json!("ada")));

        clock.advance(Duration::from_secs(10));
        assert!(cache.set_if_absent("slot", json!("bob"), None));
        assert_eq!(cache.get("slot"), Some(json!("bob")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_set_if_absent_has_one_winner() {
        let cache: EphemeralCache = EphemeralCache::default();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.set_if_absent("hold", json!(i), None) }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_last_write_wins_and_resets_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", json!("first"), Some(Duration::from_secs(5)));
        clock.advance(Duration::from_secs(4));
        cache.set("k", json!("second"), Some(Duration::from_secs(5)));
        clock.advance(Duration::from_secs(4));
        assert_eq!(cache.get("k"), Some(json!("second")));
    }

    #[test]
    fn test_delete_and_take() {
        let (cache, clock) = cache_with_clock();
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        cache.set("c", json!(3), Some(Duration::from_secs(1)));

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.take("b"), Some(json!(2)));
        assert_eq!(cache.take("b"), None);

        clock.advance(Duration::from_secs(1));
        assert!(!cache.delete("c"), "expired entry does not count as deleted");
    }

    #[test]
    fn test_keys_len_and_purge() {
        let (cache, clock) = cache_with_clock();
        cache.set("b", json!(1), None);
        cache.set("a", json!(1), None);
        cache.set("gone", json!(1), Some(Duration::from_millis(1)));
        clock.advance(Duration::from_millis(1));

        assert_eq!(cache.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().size, 3);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().size, 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let (cache, _clock) = cache_with_clock();
        let other = cache.clone();
        other.set("shared", json!(true), None);
        assert_eq!(cache.get("shared"), Some(json!(true)));
    }

    #[test]
    fn test_typed_values() {
        let cache: EphemeralCache<u32> = EphemeralCache::default();
        cache.set("n", 7, None);
        assert_eq!(cache.get("n"), Some(7));
    }

    #[test]
    fn test_json_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Quote {
            price: u64,
        }

        let (cache, _clock) = cache_with_clock();
        cache.set_json("q", &Quote { price: 10 }, None).unwrap();
        assert_eq!(cache.get_as::<Quote>("q"), Some(Quote { price: 10 }));
        assert_eq!(cache.get_as::<Vec<u8>>("q"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let cache: EphemeralCache = EphemeralCache::default();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..100 {
                    cache.set(format!("{i}-{j}"), json!(j), None);
                    cache.set("contended", json!(i), None);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(cache.len(), 16 * 100 + 1);
        assert!(cache.get("contended").is_some());
    }
}
