//! In-memory TTL cache with LRU eviction.
//!
//! One cache instance is created per semantic domain (generate proxy, intent,
//! discovery), each with its own capacity and default TTL.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// How often expired entries are swept
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub max_size: usize,
    /// TTL used when `set` is called without one
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            default_ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Recency stamp; the smallest stamp is the least recently used entry
    last_accessed: u64,
    access_count: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Current number of entries
    pub size: usize,
    /// Capacity
    pub max_size: usize,
    /// Hits over lookups, in percent
    pub hit_rate: f64,
    /// Entries removed to make room
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    counters: Counters,
    clock: u64,
}

impl<K, V> Inner<K, V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// TTL cache keyed by `K`
pub struct TtlCache<K, V> {
    name: String,
    config: CacheConfig,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new cache
    #[must_use]
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                counters: Counters::default(),
                clock: 0,
            }),
        }
    }

    /// Cache name used in logs and metrics
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry, removing it if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let stamp = inner.tick();

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = stamp;
                entry.access_count += 1;
                let value = entry.value.clone();
                let access_count = entry.access_count;
                inner.counters.hits += 1;
                debug!(cache = %self.name, access_count, "Cache hit");
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            debug!(cache = %self.name, "Cache miss (expired)");
        } else {
            debug!(cache = %self.name, "Cache miss");
        }
        inner.counters.misses += 1;
        None
    }

    /// Store a value; `ttl` defaults to the configured TTL.
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// accessed entry.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        if self.config.max_size == 0 {
            return;
        }

        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut inner = self.inner.lock();
        let stamp = inner.tick();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_size {
            self.evict_lru(&mut inner);
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: stamp,
                access_count: 0,
            },
        );

        debug!(
            cache = %self.name,
            size = inner.entries.len(),
            ttl_ms = ttl.as_millis(),
            "Value cached"
        );
    }

    fn evict_lru(&self, inner: &mut Inner<K, V>) {
        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            inner.entries.remove(&key);
            inner.counters.evictions += 1;
            debug!(cache = %self.name, "Evicted least recently used entry");
        }
    }

    /// Whether a live entry exists; does not touch recency or hit counters
    #[must_use]
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove one entry
    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
        info!(cache = %self.name, "Cache cleared");
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Only `Ok` results are stored. The lock is not held while `compute`
    /// runs, so concurrent misses for one key may compute more than once.
    ///
    /// # Errors
    /// Propagates the error returned by `compute`
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: K,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();

        if removed > 0 {
            debug!(cache = %self.name, removed, "Expired cache entries removed");
        }
        removed
    }

    /// Number of stored entries, expired ones included until swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let counters = &inner.counters;
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            counters.hits as f64 / lookups as f64 * 100.0
        };

        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            size: inner.entries.len(),
            max_size: self.config.max_size,
            hit_rate,
            evictions: counters.evictions,
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Sweep expired entries every `period` until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.purge_expired();
                    }
                    None => break,
                }
            }
        })
    }
}
