use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_REDIS_URL,
};
use crate::data::cache::sanitize_redis_url;

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Redis cache configuration section (from JSON config file)
///
/// Only the endpoint lives here. The credential comes from CLI/env.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RedisFileConfig {
    /// Connection URL for Redis-compatible backends
    pub url: Option<String>,
}

/// Memory cache configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MemoryCacheFileConfig {
    /// Maximum number of cache entries
    pub max_entries: Option<u64>,
}

/// Cache configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    /// Cache backend: memory (default) or redis
    pub backend: Option<CacheBackendType>,
    pub redis: Option<RedisFileConfig>,
    pub memory: Option<MemoryCacheFileConfig>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub cache: Option<CacheFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(cache) = other.cache {
            let current = self.cache.get_or_insert_with(CacheFileConfig::default);
            if cache.backend.is_some() {
                tracing::trace!(backend = ?cache.backend, "Merging cache.backend");
                current.backend = cache.backend;
            }
            if let Some(redis) = cache.redis {
                let current_redis = current.redis.get_or_insert_with(RedisFileConfig::default);
                if redis.url.is_some() {
                    tracing::trace!(url = "***", "Merging cache.redis.url");
                    current_redis.url = redis.url;
                }
            }
            if let Some(memory) = cache.memory {
                let current_memory = current
                    .memory
                    .get_or_insert_with(MemoryCacheFileConfig::default);
                if memory.max_entries.is_some() {
                    tracing::trace!(max_entries = ?memory.max_entries, "Merging cache.memory.max_entries");
                    current_memory.max_entries = memory.max_entries;
                }
            }
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Cache configuration (used by CacheService)
#[derive(Clone)]
pub struct CacheConfig {
    /// Cache backend type
    pub backend: CacheBackendType,
    /// Maximum entries (memory backend)
    pub max_entries: u64,
    /// Redis URL (redis backend)
    pub redis_url: Option<String>,
    /// Redis credential (redis backend), merged into the URL at connect time
    pub redis_password: Option<String>,
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("backend", &self.backend)
            .field("max_entries", &self.max_entries)
            .field("redis_url", &self.redis_url.as_deref().map(sanitize_redis_url))
            .field("redis_password", &self.redis_password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendType::Memory,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            redis_url: None,
            redis_password: None,
        }
    }
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.tcgcache/tcgcache.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        Ok(Self::from_sources(cli, file_config))
    }

    /// Layer CLI/env values over file values over defaults
    fn from_sources(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_cache = file_config.cache.unwrap_or_default();

        let backend = cli.cache_backend.or(file_cache.backend).unwrap_or_default();

        let file_memory = file_cache.memory.unwrap_or_default();
        let max_entries = cli
            .cache_max_entries
            .or(file_memory.max_entries)
            .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);

        // Redis settings are only populated when the redis backend is selected
        let (redis_url, redis_password) = if backend == CacheBackendType::Redis {
            let file_redis = file_cache.redis.unwrap_or_default();
            let url = cli
                .cache_redis_url
                .clone()
                .or(file_redis.url)
                .unwrap_or_else(|| DEFAULT_CACHE_REDIS_URL.to_string());
            (Some(url), cli.cache_redis_password.clone())
        } else {
            (None, None)
        };

        Self {
            cache: CacheConfig {
                backend,
                max_entries,
                redis_url,
                redis_password,
            },
        }
    }
}

/// Get profile config path (~/.tcgcache/tcgcache.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
