//! TTL-bounded LRU cache of section records.
//!
//! Entries expire a fixed time after insertion; reading an entry refreshes its
//! LRU position but never its expiry clock. When full, inserting a new key
//! evicts the single least-recently-used entry.

use std::num::NonZeroUsize;
use std::time::Duration;

use citeguard_core::{CodeId, SectionRecord};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Cache key: canonical code plus section number.
pub type SectionKey = (CodeId, String);

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups served from cache since creation or last clear.
    pub hit_rate: f64,
}

struct CacheEntry {
    record: SectionRecord,
    inserted_at: Instant,
}

struct Inner {
    entries: LruCache<SectionKey, CacheEntry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

/// Shared section cache. All reads and writes go through one lock, so size,
/// recency and counters always move together.
pub struct SectionCache {
    inner: Mutex<Inner>,
}

impl SectionCache {
    /// Create a cache holding at most `capacity` records (minimum 1) for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                ttl,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Look up a record. Expired entries are dropped and count as misses.
    pub fn get(&self, code: CodeId, section: &str) -> Option<SectionRecord> {
        let key = (code, section.to_string());
        let now = Instant::now();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.peek(&key) {
            Some(entry) => now.saturating_duration_since(entry.inserted_at) > inner.ttl,
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.pop(&key);
            inner.misses += 1;
            debug!(code = %code, section, "cache entry expired");
            return None;
        }

        inner.hits += 1;
        inner.entries.get(&key).map(|entry| entry.record.clone())
    }

    /// Insert or replace a record, stamping it with the current time.
    pub fn set(&self, code: CodeId, section: &str, record: SectionRecord) {
        let key = (code, section.to_string());
        let entry = CacheEntry {
            record,
            inserted_at: Instant::now(),
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !inner.entries.contains(&key) && inner.entries.len() >= inner.entries.cap().get() {
            if let Some(((evicted_code, evicted_section), _)) = inner.entries.pop_lru() {
                debug!(
                    code = %evicted_code,
                    section = %evicted_section,
                    "evicted least-recently-used section"
                );
            }
        }
        inner.entries.put(key, entry);
    }

    /// Drop every entry and reset the hit/miss counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Change the TTL applied to future reads.
    pub fn set_ttl(&self, ttl: Duration) {
        self.inner.lock().ttl = ttl;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            inner.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
        }
    }
}
