//! Card prices
//!
//! Reads go through cache-aside with stale-while-revalidate: a price an
//! hour old is still worth showing while a fresh one is fetched. A periodic
//! sync job pulls prices for tracked cards in batches so most reads hit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::SourceError;
use crate::core::constants::PRICE_SYNC_MIN_INTERVAL_SECS;
use crate::data::cache::{CacheAside, CacheKey, CacheRead, CacheService, CacheTtl, SwrOptions};

/// Cards requested from the pricing API per call
const SYNC_BATCH_SIZE: usize = 50;

/// Market prices for one card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPrices {
    pub card_id: String,
    /// ISO 4217 code
    pub currency: String,
    pub market: Option<f64>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    /// Epoch millis of the upstream quote
    pub updated_at: i64,
}

/// Upstream pricing API
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(&self, card_id: &str) -> Result<CardPrices, SourceError>;

    /// Prices for many cards; cards the source does not know are omitted
    async fn fetch_batch(&self, card_ids: &[String]) -> Result<Vec<CardPrices>, SourceError>;
}

/// Outcome of one sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub requested: usize,
    pub stored: usize,
    pub failed_batches: usize,
}

/// Cached card prices
pub struct PriceService {
    engine: CacheAside,
    source: Arc<dyn PriceSource>,
}

impl PriceService {
    pub fn new(cache: Arc<CacheService>, source: Arc<dyn PriceSource>) -> Self {
        Self {
            engine: CacheAside::new(cache),
            source,
        }
    }

    /// Current prices for a card, possibly stale while a refresh runs
    pub async fn card_prices(&self, card_id: &str) -> Result<CacheRead<CardPrices>, SourceError> {
        let key = CacheKey::card_prices(card_id);
        let source = self.source.clone();
        let card_id = card_id.to_string();
        self.engine
            .cache_aside(&key, CacheTtl::PRICES, SwrOptions::default(), move || async move {
                source.fetch_prices(&card_id).await
            })
            .await
    }

    /// Fetch and store prices for `card_ids` in batches
    ///
    /// A failed batch is logged and skipped; rate limiting stops the run.
    /// Cache errors abort the run.
    pub async fn sync(&self, card_ids: &[String]) -> Result<SyncSummary, SourceError> {
        let mut summary = SyncSummary {
            requested: card_ids.len(),
            ..SyncSummary::default()
        };

        for batch in card_ids.chunks(SYNC_BATCH_SIZE) {
            let prices = match self.source.fetch_batch(batch).await {
                Ok(prices) => prices,
                Err(SourceError::Cache(e)) => return Err(e.into()),
                Err(e @ SourceError::RateLimited { .. }) => {
                    tracing::warn!(error = %e, stored = summary.stored, "Price sync stopped early");
                    summary.failed_batches += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, batch_size = batch.len(), "Price batch failed");
                    summary.failed_batches += 1;
                    continue;
                }
            };

            let entries = prices
                .iter()
                .map(|p| (CacheKey::card_prices(&p.card_id), p))
                .collect();
            self.engine
                .store_many(entries, CacheTtl::PRICES, SwrOptions::default())
                .await?;
            summary.stored += prices.len();
        }

        tracing::info!(
            requested = summary.requested,
            stored = summary.stored,
            failed_batches = summary.failed_batches,
            "Price sync complete"
        );
        Ok(summary)
    }

    /// Start background task that periodically syncs prices for `card_ids`
    ///
    /// Returns `None` when `interval` is zero (sync disabled).
    pub fn start_sync_task(
        self: &Arc<Self>,
        card_ids: Vec<String>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        // Enforce minimum interval
        let interval = interval.max(Duration::from_secs(PRICE_SYNC_MIN_INTERVAL_SECS));
        let service = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // Skip immediate first tick

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        // A dropped sender can never signal again
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = timer.tick() => {
                        if let Err(e) = service.sync(&card_ids).await {
                            tracing::warn!(error = %e, "Scheduled price sync failed");
                        }
                    }
                }
            }
            tracing::debug!("Price sync task stopped");
        }))
    }
}
