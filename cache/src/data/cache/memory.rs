//! In-memory cache implementation using moka
//!
//! Entry expiry is tracked twice: moka evicts on its own timer with the
//! entry's TTL, and every read re-checks the absolute expiry against the
//! injected [`Clock`]. The second check is what lets tests move time
//! forward without sleeping.

use std::future::ready;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};

use super::backend::{CacheBackend, SetOptions};
use super::error::CacheError;
use crate::core::config::CacheConfig;
use crate::utils::time::{Clock, duration_millis};

/// Cache entry with data and metadata
#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    ttl: Option<Duration>,
    /// Absolute expiry in epoch millis of the injected clock
    expires_at: Option<i64>,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>, now: i64) -> Self {
        Self {
            data,
            ttl,
            expires_at: ttl.map(|ttl| now.saturating_add(duration_millis(ttl))),
        }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// Per-entry expiry tracking for variable TTLs
struct VariableTtlExpiry;

impl Expiry<String, CacheEntry> for VariableTtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_read(
        &self,
        _key: &String,
        _value: &CacheEntry,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        duration_until_expiry
    }
}

/// In-memory cache implementation
///
/// Single-process only. Suitable for development and tests; locks taken
/// here exclude tasks in this process and nothing else.
pub struct InMemoryCache {
    cache: Cache<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCache {
    /// Create a new in-memory cache with the given configuration
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            // Set initial capacity to reduce rehashing during warmup
            .initial_capacity((config.max_entries as usize / 4).min(10_000))
            .expire_after(VariableTtlExpiry)
            .build();

        Self { cache, clock }
    }

    async fn live_entry(&self, key: &str, now: i64) -> Option<CacheEntry> {
        self.cache
            .get(key)
            .await
            .filter(|entry| entry.is_live(now))
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now_millis();
        Ok(self.live_entry(key, now).await.map(|entry| entry.data))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        options: SetOptions,
    ) -> Result<bool, CacheError> {
        let now = self.clock.now_millis();
        let entry = CacheEntry::new(value, options.ttl, now);

        if !options.only_if_absent {
            self.cache.insert(key.to_string(), entry).await;
            return Ok(true);
        }

        // Per-key compute is serialized by moka, making the check-and-set atomic
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(current) if current.value().is_live(now) => Op::Nop,
                    _ => Op::Put(entry),
                };
                ready(op)
            })
            .await;

        Ok(matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        ))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let now = self.clock.now_millis();
        let mut count = 0u64;
        for key in keys {
            if let Some(entry) = self.cache.remove(key).await
                && entry.is_live(now)
            {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now_millis();
        Ok(self.live_entry(key, now).await.is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let now = self.clock.now_millis();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.live_entry(key, now).await.map(|entry| entry.data));
        }
        Ok(values)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = self.clock.now_millis();
        // Note: moka iter returns Arc<String> for keys, so we dereference
        Ok(self
            .cache
            .iter()
            .filter(|(k, entry)| entry.is_live(now) && glob_match(pattern, k))
            .map(|(k, _)| (*k).clone())
            .collect())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        for (key, value) in entries {
            self.cache.insert(key, CacheEntry::new(value, ttl, now)).await;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        // In-memory is always healthy
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-style glob match supporting `*`, `?` and `\` escapes
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position after the last `*` and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() => {
                if pattern[p + 1] == text[t] {
                    p += 2;
                    t += 1;
                    continue;
                }
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
