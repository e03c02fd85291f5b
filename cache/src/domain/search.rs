//! Search results and trending lists
//!
//! Both are cheap to serve slightly out of date and expensive to compute,
//! so they use stale-while-revalidate with short TTLs.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::SourceError;
use crate::data::cache::{CacheAside, CacheKey, CacheRead, CacheService, CacheTtl, SwrOptions};

pub struct SearchCache {
    engine: CacheAside,
}

impl SearchCache {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            engine: CacheAside::new(cache),
        }
    }

    /// One page of results for `query`
    ///
    /// Queries differing only in case or whitespace share an entry.
    pub async fn results<T, F, Fut>(
        &self,
        query: &str,
        page: u32,
        fetch: F,
    ) -> Result<CacheRead<T>, SourceError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        let key = CacheKey::search(query, page);
        self.engine
            .cache_aside(&key, CacheTtl::SEARCH, SwrOptions::default(), fetch)
            .await
    }

    /// Trending list for a time window such as `24h` or `7d`
    pub async fn trending<T, F, Fut>(&self, window: &str, fetch: F) -> Result<CacheRead<T>, SourceError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        let key = CacheKey::trending(window);
        self.engine
            .cache_aside(&key, CacheTtl::TRENDING, SwrOptions::default(), fetch)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::ManualClock;
    use std::time::Duration;

    fn setup() -> (SearchCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Arc::new(CacheService::in_memory(clock.clone()));
        (SearchCache::new(cache), clock)
    }

    #[tokio::test]
    async fn test_equivalent_queries_share_entry() {
        let (search, _) = setup();

        let first = search
            .results("Charizard  Base", 1, || async {
                Ok(vec!["base1-4".to_string()])
            })
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = search
            .results(" charizard base ", 1, || async {
                Err::<Vec<String>, _>(SourceError::Upstream("should not fetch".into()))
            })
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.data, vec!["base1-4".to_string()]);

        // Other pages are separate entries
        let page_two = search
            .results("charizard base", 2, || async { Ok(Vec::<String>::new()) })
            .await
            .unwrap();
        assert!(!page_two.from_cache);
    }

    #[tokio::test]
    async fn test_search_goes_stale_after_five_minutes() {
        let (search, clock) = setup();
        search
            .results("pikachu", 1, || async { Ok(1u32) })
            .await
            .unwrap();

        clock.advance(CacheTtl::SEARCH + Duration::from_secs(1));
        let read = search
            .results("pikachu", 1, || async { Ok(2u32) })
            .await
            .unwrap();
        assert!(read.stale);
        assert_eq!(read.data, 1);
    }

    #[tokio::test]
    async fn test_trending_fresh_for_fifteen_minutes() {
        let (search, clock) = setup();
        search
            .trending("24h", || async { Ok(vec![("sv1-1".to_string(), 12.5f64)]) })
            .await
            .unwrap();

        clock.advance(CacheTtl::TRENDING - Duration::from_secs(1));
        let read = search
            .trending("24H", || async {
                Err::<Vec<(String, f64)>, _>(SourceError::Upstream("unused".into()))
            })
            .await
            .unwrap();
        assert!(read.from_cache && !read.stale);
    }
}
