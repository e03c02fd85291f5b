//! Request coalescing over a store-side lock
//!
//! At most one caller per key runs the expensive fetch. The first caller to
//! miss takes `<key>:lock` with an atomic set-if-absent; everyone else polls
//! the store with exponential backoff until the value appears, the lock
//! disappears, or the polling budget runs out. In the last two cases the
//! follower fetches on its own, so a dead lock holder never blocks anyone
//! for longer than the budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::CacheError;
use super::key::CacheKey;
use super::policy::CacheTtl;
use super::CacheService;
use crate::utils::backoff::Backoff;

/// Where a coalesced value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Present in the store on first read
    Cache,
    /// This caller held the lock and ran the fetch
    Fetched,
    /// Another caller fetched it while this one waited
    Awaited,
    /// Waiting gave up and this caller fetched without the lock
    Fallback,
}

/// A value together with how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct Coalesced<T> {
    pub value: T,
    pub source: FetchSource,
}

/// Request coalescing engine
#[derive(Debug, Clone)]
pub struct Coalescer {
    cache: Arc<CacheService>,
    lock_ttl: Duration,
    backoff: Backoff,
}

impl Coalescer {
    /// Coalescer with the standard lock TTL and polling schedule
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            cache,
            lock_ttl: CacheTtl::LOCK,
            backoff: Backoff::default(),
        }
    }

    /// Coalescer with a custom lock TTL and polling schedule
    ///
    /// The lock must expire before followers stop waiting for it; otherwise a
    /// follower could give up on a holder that is still legitimately working.
    pub fn with_settings(
        cache: Arc<CacheService>,
        lock_ttl: Duration,
        backoff: Backoff,
    ) -> Result<Self, CacheError> {
        let budget = backoff.total_budget();
        if lock_ttl >= budget {
            return Err(CacheError::LockOutlivesPolling { lock_ttl, budget });
        }
        Ok(Self {
            cache,
            lock_ttl,
            backoff,
        })
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Read `key`, fetching it at most once across concurrent callers
    pub async fn with_coalescing<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        Ok(self.coalesce(key, ttl, fetch).await?.value)
    }

    /// Same as [`Coalescer::with_coalescing`], also reporting the value's source
    pub async fn coalesce<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Coalesced<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.cache.get::<T>(key).await? {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(Coalesced {
                value,
                source: FetchSource::Cache,
            });
        }

        let lock_key = CacheKey::lock(key);
        if let Some(sentinel) = self.cache.try_lock(&lock_key, self.lock_ttl).await? {
            tracing::debug!(key = %key, "Lock acquired, fetching");
            let value = self
                .fetch_as_holder(key, &lock_key, &sentinel, ttl, fetch)
                .await?;
            return Ok(Coalesced {
                value,
                source: FetchSource::Fetched,
            });
        }

        tracing::debug!(key = %key, "Lock held elsewhere, waiting");
        if let Some(value) = self.wait_for_value::<T>(key, &lock_key).await? {
            return Ok(Coalesced {
                value,
                source: FetchSource::Awaited,
            });
        }

        // A concurrent fallback may fetch too; the later write wins
        tracing::debug!(key = %key, "Lock holder gone or too slow, fetching directly");
        let value = fetch().await?;
        self.cache.set(key, &value, Some(ttl)).await?;
        Ok(Coalesced {
            value,
            source: FetchSource::Fallback,
        })
    }

    /// Run the fetch while holding the lock, releasing it on every path
    async fn fetch_as_holder<T, E, F, Fut>(
        &self,
        key: &str,
        lock_key: &str,
        sentinel: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match fetch().await {
            Ok(value) => {
                let stored = self.cache.set(key, &value, Some(ttl)).await;
                let released = self.cache.release_lock(lock_key, sentinel).await;
                stored?;
                released?;
                Ok(value)
            }
            Err(e) => {
                // The fetch error is what the caller needs; a failed release
                // only delays followers until the lock expires
                if let Err(release_err) = self.cache.release_lock(lock_key, sentinel).await {
                    tracing::warn!(
                        key = %key,
                        error = %release_err,
                        "Failed to release lock after fetch error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Poll for `key` while the lock holder works
    ///
    /// Returns `None` when the lock vanished without a value or the polling
    /// budget is exhausted.
    async fn wait_for_value<T: DeserializeOwned>(
        &self,
        key: &str,
        lock_key: &str,
    ) -> Result<Option<T>, CacheError> {
        for (attempt, delay) in self.backoff.delays().enumerate() {
            tokio::time::sleep(delay).await;

            if let Some(value) = self.cache.get::<T>(key).await? {
                tracing::debug!(key = %key, attempt, "Value appeared while waiting");
                return Ok(Some(value));
            }

            if !self.cache.exists(lock_key).await? {
                // The holder may have written just before releasing
                tracing::debug!(key = %key, attempt, "Lock released without value seen");
                return self.cache.get::<T>(key).await;
            }
        }

        tracing::debug!(key = %key, "Polling budget exhausted");
        Ok(None)
    }
}
