//! Cache backend trait definition

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

/// Options for a single write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Store-side expiry. `None` keeps the entry until evicted or deleted.
    pub ttl: Option<Duration>,
    /// Only write when the key is absent (atomic check-and-set)
    pub only_if_absent: bool,
}

impl SetOptions {
    /// Unconditional write with an expiry
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            only_if_absent: false,
        }
    }

    /// Conditional write with an expiry, used for lock acquisition
    pub fn if_absent(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            only_if_absent: true,
        }
    }
}

/// Cache backend trait
///
/// Defines the interface for key-value store implementations.
/// Both in-memory and Redis backends implement this trait.
///
/// # Consistency Notes
///
/// `set` with `only_if_absent` is the one operation the coalescing and
/// refresh locks rely on for mutual exclusion. Implementations must perform
/// it as a single atomic store-side operation.
///
/// Errors are never mapped to a miss. A store outage surfaces to the caller
/// instead of sending every request to the origin.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set a value in the cache
    ///
    /// Returns `false` only when `only_if_absent` was requested and the key
    /// already existed.
    async fn set(&self, key: &str, value: Vec<u8>, options: SetOptions)
    -> Result<bool, CacheError>;

    /// Delete keys from the cache, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Check if a key exists in the cache
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Get many values at once
    ///
    /// The result has the same length and order as `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError>;

    /// List keys matching a glob pattern (`*` and `?`)
    ///
    /// Performance: O(n) over the whole keyspace. Not for hot paths.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Write many entries sharing one TTL in a single batch
    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), CacheError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options_constructors() {
        let ttl = Duration::from_secs(30);
        assert_eq!(
            SetOptions::if_absent(ttl),
            SetOptions {
                ttl: Some(ttl),
                only_if_absent: true
            }
        );
        assert!(!SetOptions::with_ttl(ttl).only_if_absent);
        assert_eq!(SetOptions::default().ttl, None);
    }
}
