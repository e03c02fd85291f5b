//! Redis-compatible cache implementation using deadpool-redis
//!
//! Supports:
//! - Redis (standard)
//! - Redis Sentinel (high availability)
//! - Valkey (open-source Redis fork, drop-in compatible)
//! - Dragonfly (high-performance Redis-compatible)
//!
//! # URL Formats
//!
//! Standard Redis/Valkey/Dragonfly:
//! ```text
//! redis://[user:password@]host:port[/db]
//! rediss://[user:password@]host:port[/db]  (TLS)
//! ```
//!
//! Redis Sentinel:
//! ```text
//! redis+sentinel://[user:password@]sentinel1:port,sentinel2:port/master_name[/db]
//! ```

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{AsyncCommands, Cmd};
use deadpool_redis::{Config, Pool, Runtime};
use url::Url;

use super::backend::{CacheBackend, SetOptions};
use super::error::CacheError;
use crate::core::constants::{REDIS_POOL_MAX_SIZE, REDIS_POOL_TIMEOUT_SECS, REDIS_SCAN_COUNT};

/// Redis-compatible cache implementation
///
/// Uses connection pooling via deadpool-redis for efficient connection management.
/// Compatible with Redis, Redis Sentinel, Valkey, and Dragonfly.
pub struct RedisCache {
    pool: Pool,
    backend_type: RedisBackendType,
}

/// Type of Redis-compatible backend being used
#[derive(Debug, Clone, Copy)]
enum RedisBackendType {
    /// Standard Redis or compatible (Valkey, Dragonfly)
    Redis,
    /// Redis Sentinel for high availability
    Sentinel,
}

impl RedisCache {
    /// Create a new Redis-compatible cache with the given URL
    ///
    /// `password` is spliced into the URL when the URL carries no
    /// credentials of its own.
    pub async fn new(redis_url: &str, password: Option<&str>) -> Result<Self, CacheError> {
        let sanitized_url = sanitize_redis_url(redis_url);
        let backend_type = detect_backend_type(redis_url);
        let connect_url = redis_url_with_credential(redis_url, password);

        let timeout = Some(Duration::from_secs(REDIS_POOL_TIMEOUT_SECS));
        let mut config = Config::from_url(connect_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: REDIS_POOL_MAX_SIZE,
            timeouts: deadpool_redis::Timeouts {
                wait: timeout,
                create: timeout,
                recycle: timeout,
            },
            ..Default::default()
        });
        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            let hint = match backend_type {
                RedisBackendType::Sentinel => {
                    " (Sentinel URL format: redis+sentinel://host1:port,host2:port/master_name/db)"
                }
                RedisBackendType::Redis => "",
            };
            CacheError::Connection(format!(
                "Failed to create Redis pool for {sanitized_url}: {e}{hint}"
            ))
        })?;

        // Validate connection on startup
        let mut conn = pool.get().await.map_err(|e| {
            CacheError::Connection(format!(
                "Failed to get Redis connection from pool for {sanitized_url}: {e}"
            ))
        })?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                CacheError::Connection(format!("Redis PING failed for {sanitized_url}: {e}"))
            })?;

        let cache = Self { pool, backend_type };
        tracing::debug!(
            url = %sanitized_url,
            backend = cache.backend_name(),
            "Redis cache connected"
        );

        Ok(cache)
    }
}

/// Build a `SET` command, with `PX` when a TTL is given and `NX` when requested
fn set_command(key: &str, value: &[u8], options: SetOptions) -> Cmd {
    let mut cmd = deadpool_redis::redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = options.ttl {
        // PX keeps millisecond precision; 0 would be rejected by the server
        let ttl_ms: u64 = ttl.as_millis().try_into().unwrap_or(u64::MAX);
        cmd.arg("PX").arg(ttl_ms.max(1));
    }
    if options.only_if_absent {
        cmd.arg("NX");
    }
    cmd
}

/// Detect the backend type from URL scheme
fn detect_backend_type(url: &str) -> RedisBackendType {
    if url.starts_with("redis+sentinel://") || url.starts_with("rediss+sentinel://") {
        RedisBackendType::Sentinel
    } else {
        RedisBackendType::Redis
    }
}

/// Sanitize Redis URL for logging (removes password)
///
/// Handles both standard Redis and Sentinel URL formats:
/// - `redis://[user:password@]host:port/db`
/// - `redis+sentinel://[user:password@]sentinel1:port,sentinel2:port/master_name/db`
pub fn sanitize_redis_url(url: &str) -> String {
    // Use rfind('@') to handle passwords that may contain '@'
    if let Some(at_pos) = url.rfind('@') {
        // Find the protocol separator (handles redis://, rediss://, redis+sentinel://, etc.)
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        // Find the colon after username (must be after scheme://)
        if scheme_end <= at_pos
            && let Some(colon_pos) = url[scheme_end..at_pos].find(':')
        {
            let abs_colon = scheme_end + colon_pos;
            let prefix = &url[..abs_colon + 1];
            let suffix = &url[at_pos..];
            return format!("{prefix}***{suffix}");
        }
    }
    url.to_string()
}

/// Insert a password into a URL that has no credentials
///
/// URLs that already carry a user or password are returned unchanged; an
/// explicit credential in the URL wins.
fn redis_url_with_credential(url: &str, password: Option<&str>) -> String {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        return url.to_string();
    };

    match Url::parse(url) {
        Ok(mut parsed) => {
            if !parsed.username().is_empty() || parsed.password().is_some() {
                return url.to_string();
            }
            // set_password percent-encodes the userinfo
            if parsed.set_password(Some(password)).is_err() {
                return url.to_string();
            }
            String::from(parsed)
        }
        // Sentinel URLs list several host:port pairs, which `Url` rejects
        Err(_) => splice_credential(url, password),
    }
}

/// Textual fallback of [`redis_url_with_credential`] for multi-host URLs
fn splice_credential(url: &str, password: &str) -> String {
    let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
        return url.to_string();
    };
    let authority_end = url[scheme_end..]
        .find('/')
        .map(|i| scheme_end + i)
        .unwrap_or(url.len());
    if url[scheme_end..authority_end].contains('@') {
        return url.to_string();
    }
    format!(
        "{}:{}@{}",
        &url[..scheme_end],
        urlencoding::encode(password),
        &url[scheme_end..]
    )
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.pool.get().await?;
        let result: Option<Vec<u8>> = conn.get(key).await?;
        Ok(result)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        options: SetOptions,
    ) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await?;
        // SET replies OK, or nil when NX blocked the write
        let reply: Option<String> = set_command(key, &value, options)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let deleted: u64 = deadpool_redis::redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let values: Vec<Option<Vec<u8>>> = deadpool_redis::redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        if values.len() != keys.len() {
            return Err(CacheError::Operation(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.pool.get().await?;
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        // SCAN is O(1) per call, safe for large keyspaces
        loop {
            let (new_cursor, keys): (u64, Vec<String>) = deadpool_redis::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(REDIS_SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            found.extend(keys);

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let options = SetOptions {
            ttl,
            only_if_absent: false,
        };
        let mut pipe = deadpool_redis::redis::pipe();
        for (key, value) in &entries {
            pipe.add_command(set_command(key, value, options)).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        match self.backend_type {
            RedisBackendType::Redis => "redis",
            RedisBackendType::Sentinel => "redis-sentinel",
        }
    }
}
