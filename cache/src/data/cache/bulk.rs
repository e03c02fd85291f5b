//! Batched reads/writes and invalidation

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CacheService;
use super::error::CacheError;
use super::key::CacheKey;
use crate::core::constants::INVALIDATION_DELETE_BATCH;

/// Read many entries in one round trip, keyed by the caller's identifiers
///
/// Identifiers with nothing cached are left out of the map. A missing entry
/// means "not cached", never "cached as empty".
pub async fn get_map<I, T, K>(
    cache: &CacheService,
    ids: &[I],
    key_fn: K,
) -> Result<HashMap<I, T>, CacheError>
where
    I: Eq + Hash + Clone,
    T: DeserializeOwned,
    K: Fn(&I) -> String,
{
    let keys: Vec<String> = ids.iter().map(&key_fn).collect();
    let values = cache.get_many::<T>(&keys).await?;

    Ok(ids
        .iter()
        .zip(values)
        .filter_map(|(id, value)| value.map(|v| (id.clone(), v)))
        .collect())
}

/// Write many entries in one pipelined batch sharing `ttl`
pub async fn set_map<I, T, K>(
    cache: &CacheService,
    items: &[(I, T)],
    key_fn: K,
    ttl: Duration,
) -> Result<(), CacheError>
where
    T: Serialize,
    K: Fn(&I) -> String,
{
    let entries = items
        .iter()
        .map(|(id, value)| (key_fn(id), value))
        .collect::<Vec<_>>();
    cache.set_many(entries, Some(ttl)).await
}

/// Delete a known set of keys, returning how many existed
pub async fn invalidate_keys(cache: &CacheService, keys: &[String]) -> Result<u64, CacheError> {
    let deleted = cache.delete_many(keys).await?;
    tracing::debug!(requested = keys.len(), deleted, "Invalidated keys");
    Ok(deleted)
}

/// Delete every key under `prefix`
///
/// Scans the whole keyspace, so this is for administrative use. Request
/// paths should use [`invalidate_keys`].
pub async fn invalidate_prefix(cache: &CacheService, prefix: &str) -> Result<u64, CacheError> {
    let keys = cache.keys(&CacheKey::scan_pattern(prefix)).await?;

    let mut deleted = 0u64;
    for batch in keys.chunks(INVALIDATION_DELETE_BATCH) {
        deleted += cache.delete_many(batch).await?;
    }

    tracing::info!(prefix = %prefix, matched = keys.len(), deleted, "Invalidated cache prefix");
    Ok(deleted)
}

/// Invalidate the cached detail and prices of one card
///
/// Call this when a card's catalog data or prices change at the source.
pub async fn invalidate_card_caches(cache: &CacheService, card_id: &str) -> Result<u64, CacheError> {
    invalidate_keys(
        cache,
        &[CacheKey::card(card_id), CacheKey::card_prices(card_id)],
    )
    .await
}
