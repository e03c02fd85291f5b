//! Type-safe cache key builder with versioning

use crate::core::constants::CACHE_KEY_VERSION;

/// Suffix for the coalescing lock of a key
const LOCK_SUFFIX: &str = "lock";

/// Suffix for the background refresh lock of a key
const REFRESH_SUFFIX: &str = "refresh";

/// Type-safe cache key builder
///
/// All keys are prefixed with a version (e.g., "v1:") to allow
/// abandoning all cached data on schema changes.
///
/// Identifying fields pass through [`escape_field`], so a `:` inside an id
/// can never be read as a field separator and glob metacharacters never
/// reach a scan pattern.
pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // Cards
    // =========================================================================

    /// Cache key for card detail by ID
    pub fn card(card_id: &str) -> String {
        format!("{}:card:{}", CACHE_KEY_VERSION, escape_field(card_id))
    }

    /// Cache key for a card's current prices
    pub fn card_prices(card_id: &str) -> String {
        format!("{}:prices:{}", CACHE_KEY_VERSION, escape_field(card_id))
    }

    /// Cache key for the card listing of a set
    pub fn set_cards(set_id: &str) -> String {
        format!("{}:set:{}:cards", CACHE_KEY_VERSION, escape_field(set_id))
    }

    // =========================================================================
    // Grading Companies
    // =========================================================================

    /// Cache key for a population report of one card at one grading company
    pub fn population(company: &str, card_id: &str) -> String {
        format!(
            "{}:pop:{}:{}",
            CACHE_KEY_VERSION,
            escape_field(&company.to_lowercase()),
            escape_field(card_id)
        )
    }

    /// Cache key for a certificate record
    ///
    /// Cert numbers are trimmed; surrounding whitespace from user input
    /// must not split the cache.
    pub fn cert(company: &str, cert_number: &str) -> String {
        format!(
            "{}:cert:{}:{}",
            CACHE_KEY_VERSION,
            escape_field(&company.to_lowercase()),
            escape_field(cert_number.trim())
        )
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Cache key for one page of search results
    pub fn search(query: &str, page: u32) -> String {
        format!(
            "{}:search:{}:{}",
            CACHE_KEY_VERSION,
            escape_field(&normalize_query(query)),
            page
        )
    }

    /// Cache key for the trending leaderboard of a time window
    pub fn trending(window: &str) -> String {
        format!(
            "{}:trending:{}",
            CACHE_KEY_VERSION,
            escape_field(&window.to_lowercase())
        )
    }

    // =========================================================================
    // Locks
    // =========================================================================

    /// Lock key guarding the fetch of `key`
    pub fn lock(key: &str) -> String {
        format!("{}:{}", key, LOCK_SUFFIX)
    }

    /// Lock key guarding the background refresh of `key`
    pub fn refresh_lock(key: &str) -> String {
        format!("{}:{}", key, REFRESH_SUFFIX)
    }

    // =========================================================================
    // Prefixes (broad invalidation)
    // =========================================================================

    /// Prefix of every card detail key
    pub fn card_prefix() -> String {
        format!("{}:card:", CACHE_KEY_VERSION)
    }

    /// Prefix of every price key
    pub fn prices_prefix() -> String {
        format!("{}:prices:", CACHE_KEY_VERSION)
    }

    /// Prefix of every population key for one grading company
    pub fn population_prefix(company: &str) -> String {
        format!(
            "{}:pop:{}:",
            CACHE_KEY_VERSION,
            escape_field(&company.to_lowercase())
        )
    }

    /// Prefix of every cert key for one grading company
    pub fn cert_prefix(company: &str) -> String {
        format!(
            "{}:cert:{}:",
            CACHE_KEY_VERSION,
            escape_field(&company.to_lowercase())
        )
    }

    /// Prefix of every search result key
    pub fn search_prefix() -> String {
        format!("{}:search:", CACHE_KEY_VERSION)
    }

    /// Glob pattern matching every key under `prefix`
    ///
    /// Metacharacters in the prefix itself are escaped so that only the
    /// trailing `*` is a wildcard.
    pub fn scan_pattern(prefix: &str) -> String {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        for c in prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }
}

/// Percent-escape the characters that carry meaning inside a key
///
/// `%` is escaped first so the mapping stays injective.
pub fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            '\\' => out.push_str("%5C"),
            _ => out.push(c),
        }
    }
    out
}

/// Canonical form of a search query: trimmed, lowercased, single spaces
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
