//! TTL policy per resource class, tiered by volatility

use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// TTL constants
pub struct CacheTtl;

impl CacheTtl {
    /// Card detail for cards with active trading
    pub const CARD_HOT: Duration = Duration::from_secs(HOUR);
    /// Card detail for cards with moderate activity
    pub const CARD_WARM: Duration = Duration::from_secs(2 * HOUR);
    /// Card detail for rarely traded cards
    pub const CARD_COLD: Duration = Duration::from_secs(4 * HOUR);
    pub const PRICES: Duration = Duration::from_secs(HOUR);
    pub const POPULATION: Duration = Duration::from_secs(DAY);
    /// Grading-company records change rarely
    pub const CERT: Duration = Duration::from_secs(7 * DAY);
    pub const SEARCH: Duration = Duration::from_secs(5 * MINUTE);
    pub const TRENDING: Duration = Duration::from_secs(15 * MINUTE);
    /// Coalescing and refresh locks
    pub const LOCK: Duration = Duration::from_secs(30);
}

/// Trading activity of a card, selecting its detail TTL tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CardActivity {
    Hot,
    #[default]
    Warm,
    Cold,
}

/// Logical resource classes stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Card(CardActivity),
    SetCards,
    Prices,
    Population,
    Cert,
    Search,
    Trending,
    Lock,
}

impl ResourceClass {
    /// Store-side TTL for entries of this class
    pub fn ttl(self) -> Duration {
        match self {
            ResourceClass::Card(CardActivity::Hot) => CacheTtl::CARD_HOT,
            ResourceClass::Card(CardActivity::Warm) => CacheTtl::CARD_WARM,
            ResourceClass::Card(CardActivity::Cold) => CacheTtl::CARD_COLD,
            ResourceClass::SetCards => CacheTtl::CARD_WARM,
            ResourceClass::Prices => CacheTtl::PRICES,
            ResourceClass::Population => CacheTtl::POPULATION,
            ResourceClass::Cert => CacheTtl::CERT,
            ResourceClass::Search => CacheTtl::SEARCH,
            ResourceClass::Trending => CacheTtl::TRENDING,
            ResourceClass::Lock => CacheTtl::LOCK,
        }
    }
}
