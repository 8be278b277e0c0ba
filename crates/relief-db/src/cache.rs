//! Response cache for expensive derived reads.
//!
//! Entries carry an absolute `expires_at`. Expiry is checked against the
//! injected [`Clock`] at read time, so an entry is never served past its
//! deadline whatever the backend's own eviction does.
//!
//! # Key Patterns
//!
//! | Pattern | Value |
//! |---------|-------|
//! | `nearby:{disaster}:g{generation}:{lat}:{lon}:{radius}` | ranked nearby resources |
//! | `social:{disaster}` | mock social-media feed |

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relief_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::dragonfly::DragonflyPool;
use crate::error::StoreError;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A live entry.
    Hit(serde_json::Value),
    /// No entry, or the entry expired.
    Miss,
}

impl CacheLookup {
    /// The cached value, if any.
    pub fn into_hit(self) -> Option<serde_json::Value> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss => None,
        }
    }
}

/// A stored value with its deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached JSON value.
    pub value: serde_json::Value,
    /// Instant after which the entry is dead.
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is still servable at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A cache backend.
pub enum ResponseCache {
    /// `Dragonfly` (Redis-compatible) shared cache.
    Dragonfly(DragonflyCache),
    /// Process-local cache.
    Memory(MemoryCache),
}

impl ResponseCache {
    /// Read `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend read fails.
    pub async fn get(&self, key: &str) -> Result<CacheLookup, StoreError> {
        match self {
            Self::Dragonfly(cache) => cache.get(key).await,
            Self::Memory(cache) => Ok(cache.get(key).await),
        }
    }

    /// Store `value` under `key` until `expires_at`. Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend write fails.
    pub async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self {
            Self::Dragonfly(cache) => cache.set(key, value, expires_at).await,
            Self::Memory(cache) => {
                cache.set(key, value, expires_at).await;
                Ok(())
            }
        }
    }

    /// Drop `key` if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend delete fails.
    pub async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Dragonfly(cache) => cache.invalidate(key).await,
            Self::Memory(cache) => {
                cache.invalidate(key).await;
                Ok(())
            }
        }
    }

    /// Human-readable backend name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Dragonfly(_) => "dragonfly",
            Self::Memory(_) => "memory",
        }
    }
}

impl From<MemoryCache> for ResponseCache {
    fn from(cache: MemoryCache) -> Self {
        Self::Memory(cache)
    }
}

impl From<DragonflyCache> for ResponseCache {
    fn from(cache: DragonflyCache) -> Self {
        Self::Dragonfly(cache)
    }
}

// =========================================================================
// Memory backend
// =========================================================================

/// Process-local cache with an optional entry cap.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    max_entries: Option<usize>,
}

impl MemoryCache {
    /// Create an unbounded cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            max_entries: None,
        }
    }

    /// Cap the number of stored entries.
    #[must_use]
    pub const fn with_max_entries(mut self, max: Option<usize>) -> Self {
        self.max_entries = max;
        self
    }

    /// Number of stored entries, live or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn get(&self, key: &str) -> CacheLookup {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => CacheLookup::Hit(entry.value.clone()),
            _ => CacheLookup::Miss,
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, expires_at: DateTime<Utc>) {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        if let Some(max) = self.max_entries
            && !entries.contains_key(key)
            && entries.len() >= max
        {
            entries.retain(|_, entry| entry.is_live(now));
            while entries.len() >= max {
                let Some(victim) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.remove(&victim);
            }
        }
        if self.max_entries == Some(0) {
            return;
        }
        entries.insert(key.to_owned(), CacheEntry { value, expires_at });
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

// =========================================================================
// Dragonfly backend
// =========================================================================

/// `Dragonfly`-backed cache.
///
/// Entries are stored as a JSON [`CacheEntry`] envelope with a `PX` TTL
/// so the server evicts them on its own; the envelope's `expires_at` is
/// still re-checked on read against the injected clock.
pub struct DragonflyCache {
    pool: DragonflyPool,
    clock: Arc<dyn Clock>,
}

impl DragonflyCache {
    /// Wrap a connected pool.
    pub const fn new(pool: DragonflyPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn get(&self, key: &str) -> Result<CacheLookup, StoreError> {
        let Some(entry) = self.pool.get_json::<CacheEntry>(key).await? else {
            return Ok(CacheLookup::Miss);
        };
        if entry.is_live(self.clock.now()) {
            Ok(CacheLookup::Hit(entry.value))
        } else {
            Ok(CacheLookup::Miss)
        }
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ttl_ms = expires_at
            .signed_duration_since(self.clock.now())
            .num_milliseconds();
        if ttl_ms <= 0 {
            return self.pool.delete(key).await;
        }
        self.pool
            .set_json_px(key, &CacheEntry { value, expires_at }, ttl_ms)
            .await
    }

    async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        self.pool.delete(key).await
    }
}
