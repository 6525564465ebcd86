//! Response cache (C5 host, spec §4.5.2/§6.3): a `CachePort` trait plus the
//! default in-memory implementation.
//!
//! Cache operations never suspend (spec §5), so `CachePort` is a plain sync
//! trait rather than `async_trait` — matching the teacher's preference for
//! concrete synchronous types everywhere dynamic dispatch isn't load-bearing
//! (spec §9's "everything else should be concrete types" note, here applied
//! to sync-vs-async instead of trait-vs-concrete). The `lru` crate already
//! gives O(1) get/put with automatic least-recently-used eviction, so no
//! hand-rolled linked list is needed to meet spec §4.5.2's asymptotic bound.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::warn;

use crate::response::CanonicalResponse;

/// A single response-cache entry (spec §3.6).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CanonicalResponse,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hits: u64,
}

/// Cache-wide counters (spec §4.5.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// The response cache's interface. Any implementation satisfying this
/// contract may be supplied to the orchestrator; only the in-memory default
/// is specified here (spec §4.5.2/§6.3). Failures MUST NOT propagate: a
/// failed `get` behaves as a miss, a failed `set` is logged and swallowed.
pub trait CachePort: Send + Sync {
    fn get(&self, key: &str) -> Option<CanonicalResponse>;
    fn set(&self, key: &str, value: CanonicalResponse, ttl_seconds: u64);
    fn delete(&self, key: &str) -> bool;
    fn has(&self, key: &str) -> bool;
    fn clear(&self);
    fn stats(&self) -> CacheStats;
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded, TTL-aware, LRU-evicting in-memory [`CachePort`] implementation.
pub struct InMemoryCache {
    max_size: usize,
    inner: Mutex<Inner>,
}

impl InMemoryCache {
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            max_size,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }
}

impl CachePort for InMemoryCache {
    fn get(&self, key: &str) -> Option<CanonicalResponse> {
        let Ok(mut inner) = self.inner.lock() else {
            warn!("response cache mutex poisoned, treating get as a miss");
            return None;
        };
        let now = Utc::now();
        // `get` (rather than `peek`) both touches recency and returns a
        // reference, satisfying spec §4.5.2's "get updates last_accessed
        // atomically with the lookup".
        if let Some(entry) = inner.entries.get(key) {
            if entry.expires_at <= now {
                inner.entries.pop(key);
                inner.misses += 1;
                return None;
            }
            let value = entry.value.clone();
            inner.hits += 1;
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.hits += 1;
            }
            return Some(value);
        }
        inner.misses += 1;
        None
    }

    fn set(&self, key: &str, value: CanonicalResponse, ttl_seconds: u64) {
        let Ok(mut inner) = self.inner.lock() else {
            warn!("response cache mutex poisoned, dropping set for {key}");
            return;
        };
        let now = Utc::now();
        let was_full = inner.entries.len() >= self.max_size && !inner.entries.contains(key);
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
            hits: 0,
        };
        inner.entries.put(key.to_string(), entry);
        if was_full {
            inner.evictions += 1;
        }
    }

    fn delete(&self, key: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            warn!("response cache mutex poisoned, treating delete as a no-op");
            return false;
        };
        inner.entries.pop(key).is_some()
    }

    fn has(&self, key: &str) -> bool {
        let Ok(inner) = self.inner.lock() else {
            return false;
        };
        inner
            .entries
            .peek(key)
            .is_some_and(|e| e.expires_at > Utc::now())
    }

    fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
        }
    }

    fn stats(&self) -> CacheStats {
        let Ok(inner) = self.inner.lock() else {
            return CacheStats::default();
        };
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
