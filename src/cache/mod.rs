//! Short-lived in-memory cache for upstream balance responses.
//!
//! The handler depends on the [`BalanceCache`] trait so the cache can be
//! injected, swapped, or left out entirely. [`MemoryCache`] is the bounded,
//! TTL-gated implementation used by the binary.

use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

/// Default time-to-live for a stored balance.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default maximum number of stored balances.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Builds the cache key for an API key.
pub fn cache_key(api_key: &str) -> String {
    format!("balance_{api_key}")
}

/// A balance payload read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBalance {
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
}

/// Storage for upstream balance payloads keyed by [`cache_key`].
pub trait BalanceCache: Send + Sync {
    /// Returns the payload stored under `key` if it has not expired.
    fn get(&self, key: &str) -> Option<CachedBalance>;

    /// Stores `payload` under `key`, evicting an older entry if the cache is full.
    fn put(&self, key: &str, payload: Value);

    /// Number of entries currently held, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configuration for a [`MemoryCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Debug)]
struct Entry {
    payload: Value,
    inserted_at: Instant,
    stored_at: DateTime<Utc>,
}

/// Bounded in-memory cache with a fixed TTL.
///
/// Eviction follows insertion order: reads use `peek`, so looking an entry up
/// never moves it, and a full cache drops the entry written longest ago.
/// Expired entries are removed when read.
pub struct MemoryCache {
    ttl: Duration,
    inner: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            ttl: config.ttl,
            inner: Mutex::new(LruCache::new(config.max_entries)),
        }
    }

    /// Returns `true` if `key` is held, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl BalanceCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedBalance> {
        let mut inner = self.inner.lock();
        let entry = inner.peek(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            return Some(CachedBalance {
                payload: entry.payload.clone(),
                stored_at: entry.stored_at,
            });
        }
        inner.pop(key);
        debug!(key_len = key.len(), "expired balance entry removed");
        None
    }

    fn put(&self, key: &str, payload: Value) {
        let entry = Entry {
            payload,
            inserted_at: Instant::now(),
            stored_at: Utc::now(),
        };
        if let Some((evicted, _)) = self.inner.lock().push(key.to_owned(), entry) {
            if evicted != key {
                debug!("balance cache full, oldest entry evicted");
            }
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
