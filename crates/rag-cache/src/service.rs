//! Namespaced key-value cache with per-entry TTL and strict LRU eviction.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use rag_core::{CacheConfig, RagError};

use crate::memoize::Memoized;

type Payload = Arc<dyn Any + Send + Sync>;

/// `(namespace, key)` pair identifying one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// True for `namespace` itself and nested `namespace:*` namespaces.
    fn in_namespace(&self, namespace: &str) -> bool {
        match self.namespace.strip_prefix(namespace) {
            Some(rest) => rest.is_empty() || rest.starts_with(':'),
            None => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

struct CacheEntry {
    value: Payload,
    created_at: Instant,
    /// None when `created_at + ttl` overflows; such entries never expire.
    expires_at: Option<Instant>,
    hit_count: u64,
    last_accessed_at: Instant,
    /// Monotonic access order; the smallest value is least recently used.
    access_seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    lru_evictions: u64,
    total_requests: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    counters: Counters,
    next_seq: u64,
}

impl CacheState {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        self.counters.evictions += removed as u64;
        removed
    }

    fn evict_lru(&mut self) {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_seq)
            .map(|(key, _)| key.clone());

        if let Some(key) = lru {
            self.entries.remove(&key);
            self.counters.lru_evictions += 1;
            info!("LRU eviction: {} (cache size: {})", key, self.entries.len());
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because their TTL elapsed.
    pub evictions: u64,
    /// Entries removed to make room for a new key.
    pub lru_evictions: u64,
    pub total_requests: u64,
    pub size: usize,
    pub max_size: usize,
    /// `hits / (hits + misses)`, 0 before the first request.
    pub hit_rate: f64,
    /// Sum of hit counts over live entries.
    pub total_hits_in_cache: u64,
}

/// Description of one live entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryInfo {
    pub namespace: String,
    pub key: String,
    pub hit_count: u64,
    pub age: Duration,
    pub idle: Duration,
    /// None for entries that never expire.
    pub ttl_remaining: Option<Duration>,
    pub expired: bool,
}

/// Shared memoization cache.
///
/// One instance is created at startup and handed to every component that
/// memoizes work. All state sits behind a single mutex so the
/// check-evict-insert sequence in [`CacheService::set`] is atomic; no
/// method awaits or calls back into user code while holding it.
pub struct CacheService {
    state: Mutex<CacheState>,
    max_size: usize,
}

impl CacheService {
    /// Create a cache holding at most `max_size` entries (minimum 1).
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        info!("CacheService initialized (max_size: {})", max_size);
        Self {
            state: Mutex::new(CacheState::default()),
            max_size,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a value.
    ///
    /// Expired entries are removed and reported as a miss. A stored value of
    /// a different type than `T` is also a miss.
    pub fn get<T>(&self, namespace: &str, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cache_key = CacheKey::new(namespace, key);
        let now = Instant::now();

        let mut guard = self.lock();
        let state = &mut *guard;
        state.counters.total_requests += 1;

        let Some(entry) = state.entries.get(&cache_key) else {
            state.counters.misses += 1;
            debug!("Cache miss: {}", cache_key);
            return None;
        };

        if entry.is_expired(now) {
            state.entries.remove(&cache_key);
            state.counters.misses += 1;
            state.counters.evictions += 1;
            debug!("Cache expired: {}", cache_key);
            return None;
        }

        let Some(value) = entry.value.downcast_ref::<T>().cloned() else {
            state.counters.misses += 1;
            warn!("Cache type mismatch for {}", cache_key);
            return None;
        };

        let seq = state.bump_seq();
        if let Some(entry) = state.entries.get_mut(&cache_key) {
            entry.hit_count += 1;
            entry.last_accessed_at = now;
            entry.access_seq = seq;
            debug!("Cache hit: {} (hits: {})", cache_key, entry.hit_count);
        }
        state.counters.hits += 1;

        Some(value)
    }

    /// Store a value, replacing any entry under the same key.
    ///
    /// When a new key arrives at capacity, expired entries are swept first;
    /// if the cache is still full the least recently accessed entry goes.
    pub fn set<T>(&self, namespace: &str, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let cache_key = CacheKey::new(namespace, key);
        let now = Instant::now();

        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.entries.contains_key(&cache_key) && state.entries.len() >= self.max_size {
            let swept = state.sweep_expired(now);
            if swept > 0 {
                debug!("Swept {} expired entries before insert", swept);
            }
            if state.entries.len() >= self.max_size {
                state.evict_lru();
            }
        }

        let seq = state.bump_seq();
        debug!("Cache set: {} (ttl: {:?})", cache_key, ttl);
        state.entries.insert(
            cache_key,
            CacheEntry {
                value: Arc::new(value),
                created_at: now,
                expires_at: now.checked_add(ttl),
                hit_count: 0,
                last_accessed_at: now,
                access_seq: seq,
            },
        );

        let size = state.entries.len();
        if size > self.max_size {
            panic!(
                "{}",
                RagError::CacheCapacityViolation {
                    size,
                    max_size: self.max_size,
                }
            );
        }
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let cache_key = CacheKey::new(namespace, key);
        let removed = self.lock().entries.remove(&cache_key).is_some();
        if removed {
            debug!("Cache deleted: {}", cache_key);
        }
        removed
    }

    /// Remove one namespace (and its `namespace:*` children), or everything.
    /// Returns the number of entries removed.
    pub fn clear(&self, namespace: Option<&str>) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();

        match namespace {
            None => {
                state.entries.clear();
                info!("Cache cleared: {} entries", before);
            }
            Some(ns) => {
                state.entries.retain(|key, _| !key.in_namespace(ns));
                info!(
                    "Cache cleared for namespace '{}': {} entries",
                    ns,
                    before - state.entries.len()
                );
            }
        }

        before - state.entries.len()
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let removed = self.lock().sweep_expired(Instant::now());
        if removed > 0 {
            info!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> CacheMetrics {
        let state = self.lock();
        let counters = &state.counters;
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups > 0 {
            counters.hits as f64 / lookups as f64
        } else {
            0.0
        };

        CacheMetrics {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            lru_evictions: counters.lru_evictions,
            total_requests: counters.total_requests,
            size: state.entries.len(),
            max_size: self.max_size,
            hit_rate,
            total_hits_in_cache: state.entries.values().map(|e| e.hit_count).sum(),
        }
    }

    /// Describe live entries, most-hit first.
    pub fn entries(&self, namespace: Option<&str>) -> Vec<CacheEntryInfo> {
        let now = Instant::now();
        let state = self.lock();

        let mut info: Vec<CacheEntryInfo> = state
            .entries
            .iter()
            .filter(|(key, _)| namespace.map_or(true, |ns| key.in_namespace(ns)))
            .map(|(key, entry)| CacheEntryInfo {
                namespace: key.namespace.clone(),
                key: key.key.clone(),
                hit_count: entry.hit_count,
                age: now.saturating_duration_since(entry.created_at),
                idle: now.saturating_duration_since(entry.last_accessed_at),
                ttl_remaining: entry.expires_at.map(|at| at.saturating_duration_since(now)),
                expired: entry.is_expired(now),
            })
            .collect();

        info.sort_by(|a, b| b.hit_count.cmp(&a.hit_count).then_with(|| a.key.cmp(&b.key)));
        info
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memoize computations in `namespace` for `ttl`, keyed by a
    /// fingerprint of their arguments.
    pub fn memoize(&self, namespace: impl Into<String>, ttl: Duration) -> Memoized<'_> {
        Memoized::new(self, namespace.into(), ttl)
    }
}
