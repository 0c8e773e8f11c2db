//! Fast key/value cache used for validator lookups and snapshot warming.
//!
//! The core only needs `get` / `set` with a TTL, so the seam is the
//! [`CacheStore`] trait. [`MemoryCache`] is the in-process implementation;
//! entries expire lazily on read.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Key/value cache with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the stored bytes, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    /// Drops `key` if present.
    async fn remove(&self, key: &str);
}

/// Reads and decodes a JSON value. Undecodable entries are treated as misses.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Option<T> {
    let bytes = cache.get(key).await?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable cache entry");
            cache.remove(key).await;
            None
        }
    }
}

/// Encodes and stores a JSON value. Encoding failures are logged and skipped.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    match serde_json::to_vec(value) {
        Ok(bytes) => cache.set(key, bytes, ttl).await,
        Err(e) => warn!(key, error = %e, "Skipping cache write for unencodable value"),
    }
}

#[derive(Debug)]
struct Entry {
    expires_at: Instant,
    value: Vec<u8>,
}

/// In-process cache backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but were not read yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        // Clone out before removing so the shard guard is released.
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.value.clone()));

        match hit {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                debug!(key, "Cache entry expired");
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            self.entries.remove(key);
            return;
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}
