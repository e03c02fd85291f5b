use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::CacheBackendType;
use super::constants::{
    ENV_CACHE_BACKEND, ENV_CACHE_MAX_ENTRIES, ENV_CACHE_REDIS_PASSWORD, ENV_CACHE_REDIS_URL,
    ENV_CONFIG,
};

#[derive(Parser)]
#[command(name = "tcgcache")]
#[command(version, about = "Price guide cache administration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Cache options
    /// Cache backend (memory or redis)
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend_type)]
    pub cache_backend: Option<CacheBackendType>,

    /// Maximum number of cache entries
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// Redis-compatible cache URL. Supports Redis, Sentinel, Valkey, Dragonfly.
    /// Formats: redis://host:port/db, redis+sentinel://s1:port,s2:port/master/db
    #[arg(long, global = true, env = ENV_CACHE_REDIS_URL)]
    pub cache_redis_url: Option<String>,

    /// Password for the cache store (used when the URL carries none)
    #[arg(long, global = true, env = ENV_CACHE_REDIS_PASSWORD, hide_env_values = true)]
    pub cache_redis_password: Option<String>,
}

/// Parse cache backend type from CLI/env string
fn parse_cache_backend_type(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!(
            "Invalid cache backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Check connectivity to the cache store (default command)
    Health,
    /// Show a cached payload and any locks held on its key
    Inspect {
        /// Full cache key, e.g. v1:card:base1-4
        key: String,
    },
    /// Remove cached entries
    Invalidate {
        #[command(subcommand)]
        target: InvalidateTarget,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum InvalidateTarget {
    /// Card detail and price entries for one card
    Card {
        /// Card identifier
        id: String,
    },
    /// Card listing entry for one set
    Set {
        /// Set identifier
        id: String,
    },
    /// Every key under a prefix. Scans the whole keyspace. Requires confirmation.
    Prefix {
        /// Key prefix, e.g. v1:search:
        prefix: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub cache_backend: Option<CacheBackendType>,
    pub cache_max_entries: Option<u64>,
    pub cache_redis_url: Option<String>,
    pub cache_redis_password: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        config: cli.config,
        cache_backend: cli.cache_backend,
        cache_max_entries: cli.cache_max_entries,
        cache_redis_url: cli.cache_redis_url,
        cache_redis_password: cli.cache_redis_password,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_backend_type() {
        assert_eq!(
            parse_cache_backend_type("REDIS").unwrap(),
            CacheBackendType::Redis
        );
        assert_eq!(
            parse_cache_backend_type("memory").unwrap(),
            CacheBackendType::Memory
        );
        let err = parse_cache_backend_type("memcached").unwrap_err();
        assert!(err.contains("memcached"));
    }

    #[test]
    fn test_parse_invalidate_prefix() {
        let cli = Cli::try_parse_from(["tcgcache", "invalidate", "prefix", "v1:search:", "--yes"])
            .unwrap();
        match cli.command {
            Some(Commands::Invalidate {
                target: InvalidateTarget::Prefix { prefix, yes },
            }) => {
                assert_eq!(prefix, "v1:search:");
                assert!(yes);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_args_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tcgcache",
            "inspect",
            "v1:card:base1-4",
            "--cache-backend",
            "redis",
        ])
        .unwrap();
        assert_eq!(cli.cache_backend, Some(CacheBackendType::Redis));
        assert!(matches!(cli.command, Some(Commands::Inspect { .. })));
    }
}
