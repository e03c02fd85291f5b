//! Cache-aside with stale-while-revalidate
//!
//! Entries are stored as an envelope carrying the write time, so staleness
//! is computed from the entry itself. An entry is fresh for `ttl`, then
//! servable-but-stale until `ttl + stale_ttl`, after which the store drops
//! it. Stale reads return immediately and kick off one background refresh
//! per key, guarded by `<key>:refresh`.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::CacheService;
use super::error::CacheError;
use super::key::CacheKey;
use super::policy::CacheTtl;
use crate::utils::time::duration_millis;

/// Stored form of an SWR entry
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    data: T,
    /// Write time in epoch millis
    stored_at: i64,
}

/// Borrowing twin of [`Envelope`] for writes
#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    data: &'a T,
    stored_at: i64,
}

/// Per-call SWR behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwrOptions {
    /// Serve stale entries while refreshing in the background
    pub stale_while_revalidate: bool,
    /// How long past `ttl` a stale entry may be served; defaults to `ttl`
    pub stale_ttl: Option<Duration>,
}

impl Default for SwrOptions {
    fn default() -> Self {
        Self {
            stale_while_revalidate: true,
            stale_ttl: None,
        }
    }
}

impl SwrOptions {
    /// Plain cache-aside: stale entries are re-fetched synchronously
    pub fn disabled() -> Self {
        Self {
            stale_while_revalidate: false,
            stale_ttl: None,
        }
    }

    /// Store-side lifetime of an entry written with `ttl`
    fn retention(&self, ttl: Duration) -> Duration {
        ttl.saturating_add(self.stale_ttl.unwrap_or(ttl))
    }
}

/// Result of a cache-aside read
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    pub data: T,
    /// Served from the store rather than fetched by this call
    pub from_cache: bool,
    /// Older than its ttl; a background refresh has been started
    pub stale: bool,
}

/// Cache-aside engine with stale-while-revalidate
#[derive(Debug, Clone)]
pub struct CacheAside {
    cache: Arc<CacheService>,
    refresh_lock_ttl: Duration,
}

impl CacheAside {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            cache,
            refresh_lock_ttl: CacheTtl::LOCK,
        }
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Read `key`, fetching on miss and refreshing stale entries
    ///
    /// The fetch is `'static` because a stale hit hands it to a background
    /// task. Errors from that task are logged, never returned.
    pub async fn cache_aside<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        options: SwrOptions,
        fetch: F,
    ) -> Result<CacheRead<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<CacheError> + Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if let Some(envelope) = self.cache.get::<Envelope<T>>(key).await? {
            let age = self.cache.clock().now_millis() - envelope.stored_at;

            if age <= duration_millis(ttl) {
                tracing::debug!(key = %key, age_ms = age, "Cache hit");
                return Ok(CacheRead {
                    data: envelope.data,
                    from_cache: true,
                    stale: false,
                });
            }

            if options.stale_while_revalidate && age <= duration_millis(options.retention(ttl)) {
                tracing::debug!(key = %key, age_ms = age, "Serving stale, refreshing in background");
                self.spawn_refresh(key.to_string(), ttl, options, fetch);
                return Ok(CacheRead {
                    data: envelope.data,
                    from_cache: true,
                    stale: true,
                });
            }

            tracing::debug!(key = %key, age_ms = age, "Stale entry, fetching");
        } else {
            tracing::debug!(key = %key, "Cache miss");
        }

        let data = fetch().await?;
        store(&self.cache, key, &data, ttl, options).await?;
        Ok(CacheRead {
            data,
            from_cache: false,
            stale: false,
        })
    }

    /// Write many fresh entries in one batch, as if each had just been fetched
    ///
    /// Used by batch jobs that pull data ahead of readers.
    pub async fn store_many<T: Serialize>(
        &self,
        entries: Vec<(String, &T)>,
        ttl: Duration,
        options: SwrOptions,
    ) -> Result<(), CacheError> {
        let stored_at = self.cache.clock().now_millis();
        let envelopes: Vec<(String, EnvelopeRef<'_, T>)> = entries
            .into_iter()
            .map(|(key, data)| (key, EnvelopeRef { data, stored_at }))
            .collect();
        let refs = envelopes
            .iter()
            .map(|(key, envelope)| (key.clone(), envelope))
            .collect();
        self.cache
            .set_many(refs, Some(options.retention(ttl)))
            .await
    }

    fn spawn_refresh<T, E, F, Fut>(&self, key: String, ttl: Duration, options: SwrOptions, fetch: F)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<CacheError> + Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let cache = self.cache.clone();
        let lock_ttl = self.refresh_lock_ttl;
        tokio::spawn(async move {
            match refresh(&cache, &key, ttl, options, lock_ttl, fetch).await {
                Ok(true) => tracing::debug!(key = %key, "Background refresh stored"),
                Ok(false) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Background refresh failed"),
            }
        });
    }
}

/// Refresh `key` under its refresh lock
///
/// Returns `Ok(false)` when another task holds the lock or already
/// refreshed the entry.
async fn refresh<T, E, F, Fut>(
    cache: &CacheService,
    key: &str,
    ttl: Duration,
    options: SwrOptions,
    lock_ttl: Duration,
    fetch: F,
) -> Result<bool, E>
where
    T: Serialize + DeserializeOwned,
    E: From<CacheError> + Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let lock_key = CacheKey::refresh_lock(key);
    let Some(sentinel) = cache.try_lock(&lock_key, lock_ttl).await? else {
        tracing::debug!(key = %key, "Refresh already in progress");
        return Ok(false);
    };

    let result = refresh_locked(cache, key, ttl, options, fetch).await;

    if let Err(e) = cache.release_lock(&lock_key, &sentinel).await {
        tracing::warn!(key = %key, error = %e, "Failed to release refresh lock");
    }
    result
}

async fn refresh_locked<T, E, F, Fut>(
    cache: &CacheService,
    key: &str,
    ttl: Duration,
    options: SwrOptions,
    fetch: F,
) -> Result<bool, E>
where
    T: Serialize + DeserializeOwned,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    // Someone may have refreshed between our stale read and taking the lock
    if let Some(envelope) = cache.get::<Envelope<T>>(key).await? {
        let age = cache.clock().now_millis() - envelope.stored_at;
        if age <= duration_millis(ttl) {
            return Ok(false);
        }
    }

    let data = fetch().await?;
    store(cache, key, &data, ttl, options).await?;
    Ok(true)
}

async fn store<T: Serialize>(
    cache: &CacheService,
    key: &str,
    data: &T,
    ttl: Duration,
    options: SwrOptions,
) -> Result<(), CacheError> {
    let envelope = EnvelopeRef {
        data,
        stored_at: cache.clock().now_millis(),
    };
    cache.set(key, &envelope, Some(options.retention(ttl))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cache::unavailable;
    use crate::utils::time::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("upstream unavailable")]
        Upstream,
        #[error(transparent)]
        Cache(#[from] CacheError),
    }

    struct Harness {
        clock: Arc<ManualClock>,
        engine: CacheAside,
        fetches: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(1_700_000_000_000));
            let cache = Arc::new(CacheService::in_memory(clock.clone()));
            Self {
                clock,
                engine: CacheAside::new(cache),
                fetches: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Read with a fetch that returns the fetch count after a short delay
        async fn read(&self, options: SwrOptions) -> Result<CacheRead<usize>, TestError> {
            let fetches = self.fetches.clone();
            self.engine
                .cache_aside("v1:search:charizard:1", TTL, options, move || async move {
                    let n = fetches.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(n)
                })
                .await
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_miss_then_fresh_hit() {
        let h = Harness::new();

        let first = h.read(SwrOptions::default()).await.unwrap();
        assert_eq!(
            first,
            CacheRead { data: 1, from_cache: false, stale: false }
        );

        h.clock.advance(Duration::from_secs(59));
        let second = h.read(SwrOptions::default()).await.unwrap();
        assert_eq!(
            second,
            CacheRead { data: 1, from_cache: true, stale: false }
        );
        assert_eq!(h.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_exactly_ttl_is_fresh() {
        let h = Harness::new();
        h.read(SwrOptions::default()).await.unwrap();

        h.clock.advance(TTL);
        let read = h.read(SwrOptions::default()).await.unwrap();
        assert!(!read.stale);
    }

    #[tokio::test]
    async fn test_concurrent_stale_reads_refresh_once() {
        let h = Harness::new();
        h.read(SwrOptions::default()).await.unwrap();

        h.clock.advance(Duration::from_secs(61));
        let reads = (0..10).map(|_| h.read(SwrOptions::default()));
        let results = futures::future::join_all(reads).await;
        for result in results {
            let read = result.unwrap();
            assert_eq!(read, CacheRead { data: 1, from_cache: true, stale: true });
        }

        // Let the background refresh finish
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.fetch_count(), 2);

        let refreshed = h.read(SwrOptions::default()).await.unwrap();
        assert_eq!(
            refreshed,
            CacheRead { data: 2, from_cache: true, stale: false }
        );
        assert!(
            !h.engine
                .cache()
                .exists(&CacheKey::refresh_lock("v1:search:charizard:1"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_swr_disabled_refetches_synchronously() {
        let h = Harness::new();
        h.read(SwrOptions::disabled()).await.unwrap();

        h.clock.advance(Duration::from_secs(61));
        let read = h.read(SwrOptions::disabled()).await.unwrap();
        assert_eq!(read, CacheRead { data: 2, from_cache: false, stale: false });
        assert_eq!(h.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_past_retention_is_a_miss() {
        let h = Harness::new();
        h.read(SwrOptions::default()).await.unwrap();

        // Default retention is 2 x ttl
        h.clock.advance(Duration::from_secs(121));
        let read = h.read(SwrOptions::default()).await.unwrap();
        assert_eq!(read, CacheRead { data: 2, from_cache: false, stale: false });
    }

    #[tokio::test]
    async fn test_custom_stale_ttl_extends_retention() {
        let h = Harness::new();
        let options = SwrOptions {
            stale_while_revalidate: true,
            stale_ttl: Some(Duration::from_secs(600)),
        };
        h.read(options).await.unwrap();

        h.clock.advance(Duration::from_secs(300));
        let read = h.read(options).await.unwrap();
        assert!(read.stale);
        assert_eq!(read.data, 1);
    }

    #[tokio::test]
    async fn test_background_failure_is_swallowed_and_releases_lock() {
        let h = Harness::new();
        h.read(SwrOptions::default()).await.unwrap();
        h.clock.advance(Duration::from_secs(61));

        let read = h
            .engine
            .cache_aside("v1:search:charizard:1", TTL, SwrOptions::default(), || async {
                Err::<usize, _>(TestError::Upstream)
            })
            .await
            .unwrap();
        assert!(read.stale);
        assert_eq!(read.data, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let cache = h.engine.cache();
        assert!(
            !cache
                .exists(&CacheKey::refresh_lock("v1:search:charizard:1"))
                .await
                .unwrap()
        );
        // The stale entry is still served
        assert!(h.read(SwrOptions::default()).await.unwrap().stale);
    }

    #[tokio::test]
    async fn test_miss_fetch_error_propagates() {
        let h = Harness::new();
        let result = h
            .engine
            .cache_aside("k", TTL, SwrOptions::default(), || async {
                Err::<usize, _>(TestError::Upstream)
            })
            .await;
        assert!(matches!(result, Err(TestError::Upstream)));
        assert!(!h.engine.cache().exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_propagates_without_fetching() {
        let engine = CacheAside::new(Arc::new(unavailable::service()));
        let fetches = Arc::new(AtomicUsize::new(0));

        let counter = fetches.clone();
        let result = engine
            .cache_aside("k", TTL, SwrOptions::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(1usize)
            })
            .await;
        assert!(matches!(
            result,
            Err(TestError::Cache(CacheError::Connection(_)))
        ));
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_leaves_lock_taken_over_during_fetch() {
        let h = Harness::new();
        h.read(SwrOptions::default()).await.unwrap();
        h.clock.advance(Duration::from_secs(61));

        let cache = h.engine.cache().clone();
        let lock_key = CacheKey::refresh_lock("v1:search:charizard:1");
        let takeover_key = lock_key.clone();
        let read = h
            .engine
            .cache_aside("v1:search:charizard:1", TTL, SwrOptions::default(), move || async move {
                cache.delete(&takeover_key).await.unwrap();
                cache
                    .set_if_absent(&takeover_key, "other", Duration::from_secs(30))
                    .await
                    .unwrap();
                Ok::<_, TestError>(5usize)
            })
            .await
            .unwrap();
        assert!(read.stale);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            h.engine.cache().get::<String>(&lock_key).await.unwrap(),
            Some("other".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_many_is_read_as_fresh() {
        let h = Harness::new();
        let (a, b) = (7usize, 8usize);
        h.engine
            .store_many(
                vec![
                    ("v1:search:charizard:1".to_string(), &a),
                    ("v1:search:charizard:2".to_string(), &b),
                ],
                TTL,
                SwrOptions::default(),
            )
            .await
            .unwrap();

        let read = h.read(SwrOptions::default()).await.unwrap();
        assert_eq!(read, CacheRead { data: 7, from_cache: true, stale: false });
        assert_eq!(h.fetch_count(), 0);

        h.clock.advance(Duration::from_secs(61));
        assert!(h.read(SwrOptions::default()).await.unwrap().stale);
    }

    #[test]
    fn test_retention() {
        assert_eq!(SwrOptions::default().retention(TTL), 2 * TTL);
        let options = SwrOptions {
            stale_while_revalidate: true,
            stale_ttl: Some(Duration::from_secs(5)),
        };
        assert_eq!(options.retention(TTL), Duration::from_secs(65));
    }
}
