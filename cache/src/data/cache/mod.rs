//! Cache module
//!
//! Provides caching infrastructure with pluggable backends:
//! - In-memory (default) - uses moka
//! - Redis - uses deadpool-redis
//!
//! On top of the store it provides request coalescing, cache-aside with
//! stale-while-revalidate, and bulk/invalidation helpers.

mod backend;
mod bulk;
mod coalesce;
mod error;
mod key;
mod memory;
mod policy;
mod redis;
mod swr;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{CacheBackend, SetOptions};
pub use bulk::{get_map, invalidate_card_caches, invalidate_keys, invalidate_prefix, set_map};
pub use coalesce::{Coalesced, Coalescer, FetchSource};
pub use error::CacheError;
pub use key::{CacheKey, escape_field, normalize_query};
pub use memory::InMemoryCache;
pub use policy::{CacheTtl, CardActivity, ResourceClass};
pub use redis::RedisCache;
pub(crate) use redis::sanitize_redis_url;
pub use swr::{CacheAside, CacheRead, SwrOptions};

use crate::core::config::{CacheBackendType, CacheConfig};
use crate::utils::time::{Clock, SystemClock};

/// Per-process counter making lock sentinels unique within one millisecond
static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Cache service providing typed access to cache backend
///
/// Wraps the underlying cache backend and provides:
/// - Raw bytes API for flexibility
/// - Typed API using MessagePack serialization
///
/// The engines built on top only ever see typed values.
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl CacheService {
    /// Create a new cache service from configuration
    pub async fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendType::Memory => {
                tracing::debug!(
                    max_entries = config.max_entries,
                    "Initializing in-memory cache"
                );
                Arc::new(InMemoryCache::new(config, clock.clone()))
            }
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    CacheError::Config("redis_url required for Redis backend".into())
                })?;
                // Note: RedisCache::new logs sanitized URL internally
                Arc::new(RedisCache::new(url, config.redis_password.as_deref()).await?)
            }
        };

        Ok(Self::with_backend(backend, clock))
    }

    /// Create a cache service over an existing backend
    pub fn with_backend(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// In-memory cache service with default capacity, driven by `clock`
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let backend = Arc::new(InMemoryCache::new(&CacheConfig::default(), clock.clone()));
        Self::with_backend(backend, clock)
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Clock used for envelope timestamps and lock sentinels
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // =========================================================================
    // Raw bytes API
    // =========================================================================

    /// Get raw bytes from cache
    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.backend.get(key).await
    }

    /// Set raw bytes in cache
    pub async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        options: SetOptions,
    ) -> Result<bool, CacheError> {
        self.backend.set(key, value, options).await
    }

    // =========================================================================
    // Typed API (serde)
    // =========================================================================

    /// Get a typed value from cache
    ///
    /// Uses MessagePack for compact, fast deserialization.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(Some(decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Set a typed value in cache
    ///
    /// Uses MessagePack for compact, fast serialization.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.set_raw(key, encode(value)?, SetOptions { ttl, only_if_absent: false })
            .await?;
        Ok(())
    }

    /// Set a typed value only if the key is absent
    ///
    /// Returns `true` when this call wrote the value.
    pub async fn set_if_absent<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.set_raw(key, encode(value)?, SetOptions::if_absent(ttl))
            .await
    }

    /// Get many typed values, in the order of `keys`
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<Vec<Option<T>>, CacheError> {
        self.backend
            .mget(keys)
            .await?
            .into_iter()
            .zip(keys)
            .map(|(bytes, key)| bytes.map(|b| decode::<T>(key, &b)).transpose())
            .collect()
    }

    /// Write many typed values sharing one TTL in a single batch
    pub async fn set_many<T: Serialize>(
        &self,
        entries: Vec<(String, &T)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let encoded = entries
            .into_iter()
            .map(|(key, value)| Ok((key, encode(value)?)))
            .collect::<Result<Vec<_>, CacheError>>()?;
        self.backend.set_many(encoded, ttl).await
    }

    // =========================================================================
    // Locks
    // =========================================================================

    /// Take `lock_key` if nobody holds it
    ///
    /// Returns the sentinel written into the lock, which the holder passes
    /// back to [`CacheService::release_lock`]. The sentinel starts with the
    /// acquisition time in epoch millis.
    pub(crate) async fn try_lock(
        &self,
        lock_key: &str,
        ttl: Duration,
    ) -> Result<Option<String>, CacheError> {
        let sentinel = format!(
            "{}-{}-{}",
            self.clock.now_millis(),
            std::process::id(),
            LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let acquired = self.set_if_absent(lock_key, &sentinel, ttl).await?;
        Ok(acquired.then_some(sentinel))
    }

    /// Delete `lock_key` if it still holds `sentinel`
    ///
    /// Returns `false` when the lock expired and someone else took it. The
    /// read and the delete are two round trips, so a takeover landing
    /// between them is still lost.
    pub(crate) async fn release_lock(
        &self,
        lock_key: &str,
        sentinel: &str,
    ) -> Result<bool, CacheError> {
        let current = self.get_raw(lock_key).await?;
        if current.as_deref() != Some(encode(sentinel)?.as_slice()) {
            tracing::debug!(lock = %lock_key, "Lock no longer ours, leaving it");
            return Ok(false);
        }
        self.delete(lock_key).await
    }

    // =========================================================================
    // Other operations
    // =========================================================================

    /// Delete a key from cache
    ///
    /// Returns `true` if the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.backend.delete(&[key.to_string()]).await? > 0)
    }

    /// Delete several keys, returning how many existed
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.backend.delete(keys).await
    }

    /// Check if a key exists
    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }

    /// List keys matching a glob pattern
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.backend.keys(pattern).await
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.backend.health_check().await
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(rmp_serde::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, CacheError> {
    rmp_serde::from_slice(bytes).map_err(|source| CacheError::Decode {
        key: key.to_string(),
        source,
    })
}
