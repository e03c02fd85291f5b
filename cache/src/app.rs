//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::cli::{self, CliConfig, Commands, InvalidateTarget};
use crate::core::config::{AppConfig, CacheBackendType};
use crate::core::constants::{APP_NAME, APP_NAME_LOWER, ENV_LOG};
use crate::data::cache::{self, CacheKey, CacheService};

pub struct CoreApp {
    pub config: AppConfig,
    pub cache: Arc<CacheService>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        let app = Self::init(&cli_config).await?;
        match command.unwrap_or(Commands::Health) {
            Commands::Health => app.health().await,
            Commands::Inspect { key } => app.inspect(&key).await,
            Commands::Invalidate { target } => app.invalidate(target).await,
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        tracing::debug!(config = ?config, "Configuration loaded");

        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .context("Failed to initialize cache service")?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        if config.cache.backend == CacheBackendType::Memory {
            tracing::warn!(
                "Using the in-memory backend; commands only see this process's empty cache"
            );
        }

        Ok(Self { config, cache })
    }

    async fn health(&self) -> Result<()> {
        self.cache
            .health_check()
            .await
            .context("Cache health check failed")?;
        println!("{} cache OK ({})", APP_NAME, self.cache.backend_name());
        Ok(())
    }

    async fn inspect(&self, key: &str) -> Result<()> {
        let Some(bytes) = self
            .cache
            .get_raw(key)
            .await
            .with_context(|| format!("Failed to read key: {key}"))?
        else {
            println!("{key}: not cached");
            return Ok(());
        };

        println!("{key}: {} bytes", bytes.len());
        // Payloads are MessagePack; render any of them as JSON
        match rmp_serde::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(e) => println!("(undecodable payload: {e})"),
        }

        for lock_key in [CacheKey::lock(key), CacheKey::refresh_lock(key)] {
            if self.cache.exists(&lock_key).await? {
                println!("lock held: {lock_key}");
            }
        }
        Ok(())
    }

    async fn invalidate(&self, target: InvalidateTarget) -> Result<()> {
        let deleted = match target {
            InvalidateTarget::Card { id } => cache::invalidate_card_caches(&self.cache, &id).await?,
            InvalidateTarget::Set { id } => {
                cache::invalidate_keys(&self.cache, &[CacheKey::set_cards(&id)]).await?
            }
            InvalidateTarget::Prefix { prefix, yes } => {
                if prefix.is_empty() {
                    anyhow::bail!("Refusing to invalidate an empty prefix");
                }
                if !yes && !Self::confirm_prefix(&prefix)? {
                    println!("Aborted.");
                    return Ok(());
                }
                cache::invalidate_prefix(&self.cache, &prefix).await?
            }
        };
        println!("Deleted {deleted} key(s)");
        Ok(())
    }

    fn confirm_prefix(prefix: &str) -> Result<bool> {
        println!("This will delete every key starting with:");
        println!("  {prefix}");
        println!();
        println!("The keyspace is scanned in full, which loads the store on large deployments.");

        print!("\nContinue? [y/N] ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        Ok(matches!(
            input.trim().to_lowercase().as_str(),
            "y" | "yes"
        ))
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}
