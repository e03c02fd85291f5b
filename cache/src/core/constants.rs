// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "TcgCache";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "tcgcache";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".tcgcache";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tcgcache.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TCGCACHE_CONFIG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TCGCACHE_LOG";

// =============================================================================
// Environment Variables - Cache
// =============================================================================

/// Environment variable for cache backend (memory or redis)
pub const ENV_CACHE_BACKEND: &str = "TCGCACHE_CACHE_BACKEND";

/// Environment variable for in-memory cache capacity
pub const ENV_CACHE_MAX_ENTRIES: &str = "TCGCACHE_CACHE_MAX_ENTRIES";

/// Environment variable for the Redis-compatible store endpoint
pub const ENV_CACHE_REDIS_URL: &str = "TCGCACHE_CACHE_REDIS_URL";

/// Environment variable for the store credential
///
/// Only read from the environment or CLI, never from config files.
pub const ENV_CACHE_REDIS_PASSWORD: &str = "TCGCACHE_CACHE_REDIS_PASSWORD";

// =============================================================================
// Cache Defaults
// =============================================================================

/// Default maximum entries for the in-memory backend
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

/// Default Redis URL when the redis backend is selected without one
pub const DEFAULT_CACHE_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Cache key version prefix
///
/// Bump when a cached payload changes shape; old entries are then ignored
/// and age out on their own TTL.
pub const CACHE_KEY_VERSION: &str = "v1";

/// Redis connection pool size
pub const REDIS_POOL_MAX_SIZE: usize = 32;

/// Redis pool wait/create/recycle timeout in seconds
pub const REDIS_POOL_TIMEOUT_SECS: u64 = 5;

/// SCAN batch hint for prefix invalidation
pub const REDIS_SCAN_COUNT: usize = 500;

/// Maximum keys per DEL during broad invalidation
pub const INVALIDATION_DELETE_BATCH: usize = 500;

// =============================================================================
// Request Coalescing
// =============================================================================

/// First follower poll delay in milliseconds
pub const COALESCE_POLL_BASE_DELAY_MS: u64 = 100;

/// Multiplier applied to each successive poll delay
pub const COALESCE_POLL_MULTIPLIER: f64 = 1.5;

/// Upper bound for a single poll delay in milliseconds
pub const COALESCE_POLL_MAX_DELAY_MS: u64 = 2_000;

/// Number of polls before a follower falls back to fetching itself
///
/// With the delays above this is roughly 37s of waiting, longer than the
/// 30s lock TTL.
pub const COALESCE_POLL_MAX_ATTEMPTS: u32 = 24;

// =============================================================================
// Price Sync
// =============================================================================

/// Minimum interval between scheduled price syncs in seconds
pub const PRICE_SYNC_MIN_INTERVAL_SECS: u64 = 60;
