//! Domain callers of the cache layer
//!
//! - `certs` - Grading certificate lookups (coalesced)
//! - `population` - Grading population reports (coalesced, bulk)
//! - `prices` - Card prices (stale-while-revalidate, periodic sync)
//! - `search` - Search results and trending lists (stale-while-revalidate)

pub mod certs;
pub mod population;
pub mod prices;
pub mod search;

pub use certs::{CertRecord, CertService, CertVerifier};
pub use population::{PopulationReport, PopulationService, PopulationSource};
pub use prices::{CardPrices, PriceService, PriceSource, SyncSummary};
pub use search::SearchCache;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::cache::CacheError;

/// Errors from upstream data sources and the cache in front of them
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Upstream source error: {0}")]
    Upstream(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited by upstream{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Grading companies with population reports and certificate lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradingCompany {
    Psa,
    Bgs,
    Cgc,
    Sgc,
}

impl GradingCompany {
    /// Lowercase identifier used in cache keys
    pub fn as_str(self) -> &'static str {
        match self {
            GradingCompany::Psa => "psa",
            GradingCompany::Bgs => "bgs",
            GradingCompany::Cgc => "cgc",
            GradingCompany::Sgc => "sgc",
        }
    }
}

impl fmt::Display for GradingCompany {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl FromStr for GradingCompany {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "psa" => Ok(GradingCompany::Psa),
            "bgs" | "beckett" => Ok(GradingCompany::Bgs),
            "cgc" => Ok(GradingCompany::Cgc),
            "sgc" => Ok(GradingCompany::Sgc),
            _ => Err(format!(
                "Invalid grading company '{}'. Valid options: psa, bgs, cgc, sgc",
                s
            )),
        }
    }
}
