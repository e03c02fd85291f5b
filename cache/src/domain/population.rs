//! Grading population reports

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GradingCompany, SourceError};
use crate::data::cache::{self, CacheKey, CacheService, CacheTtl, Coalescer};

/// How many copies of a card a grading company has graded, per grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationReport {
    pub company: GradingCompany,
    pub card_id: String,
    /// Grade label to count, e.g. "10" -> 1204
    pub grades: BTreeMap<String, u32>,
}

impl PopulationReport {
    pub fn total(&self) -> u64 {
        self.grades.values().map(|&n| u64::from(n)).sum()
    }
}

/// Upstream population report scraping
#[async_trait]
pub trait PopulationSource: Send + Sync {
    async fn fetch_report(
        &self,
        company: GradingCompany,
        card_id: &str,
    ) -> Result<PopulationReport, SourceError>;
}

/// Cached population reports
pub struct PopulationService {
    coalescer: Coalescer,
    source: Arc<dyn PopulationSource>,
}

impl PopulationService {
    pub fn new(cache: Arc<CacheService>, source: Arc<dyn PopulationSource>) -> Self {
        Self {
            coalescer: Coalescer::new(cache),
            source,
        }
    }

    /// Population report for one card, scraped at most once a day
    pub async fn report(
        &self,
        company: GradingCompany,
        card_id: &str,
    ) -> Result<PopulationReport, SourceError> {
        let key = CacheKey::population(company.as_str(), card_id);
        self.coalescer
            .with_coalescing(&key, CacheTtl::POPULATION, || {
                self.source.fetch_report(company, card_id)
            })
            .await
    }

    /// Cached reports for many cards in one read
    ///
    /// Cards without a cached report are absent from the map; nothing is
    /// fetched upstream.
    pub async fn cached_reports(
        &self,
        company: GradingCompany,
        card_ids: &[String],
    ) -> Result<HashMap<String, PopulationReport>, SourceError> {
        let reports = cache::get_map(self.coalescer.cache(), card_ids, |card_id| {
            CacheKey::population(company.as_str(), card_id)
        })
        .await?;
        Ok(reports)
    }

    /// Store reports produced by a batch scrape
    ///
    /// Reports for another company are skipped.
    pub async fn store_reports(
        &self,
        company: GradingCompany,
        reports: Vec<PopulationReport>,
    ) -> Result<usize, SourceError> {
        let (matching, skipped): (Vec<_>, Vec<_>) = reports
            .into_iter()
            .partition(|report| report.company == company);
        if !skipped.is_empty() {
            tracing::warn!(
                company = %company,
                skipped = skipped.len(),
                "Skipping population reports for another company"
            );
        }

        let items: Vec<(String, PopulationReport)> = matching
            .into_iter()
            .map(|report| (report.card_id.clone(), report))
            .collect();
        cache::set_map(
            self.coalescer.cache(),
            &items,
            |card_id| CacheKey::population(company.as_str(), card_id),
            CacheTtl::POPULATION,
        )
        .await?;

        tracing::debug!(company = %company, stored = items.len(), "Stored population reports");
        Ok(items.len())
    }
}
