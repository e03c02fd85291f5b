//! Grading certificate lookups
//!
//! Verification scrapes a grading company's site, which is slow and rate
//! limited, while the record itself almost never changes. Lookups are
//! coalesced so a burst of users checking the same slab costs one scrape.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GradingCompany, SourceError};
use crate::data::cache::{CacheKey, CacheService, CacheTtl, Coalescer};

/// A verified grading certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertRecord {
    pub company: GradingCompany,
    pub cert_number: String,
    pub card_name: String,
    pub grade: String,
    pub year: Option<u16>,
    /// Epoch millis of the upstream verification
    pub verified_at: i64,
}

/// Upstream certificate verification
#[async_trait]
pub trait CertVerifier: Send + Sync {
    async fn verify(
        &self,
        company: GradingCompany,
        cert_number: &str,
    ) -> Result<CertRecord, SourceError>;
}

/// Cached certificate lookups
pub struct CertService {
    coalescer: Coalescer,
    verifier: Arc<dyn CertVerifier>,
}

impl CertService {
    pub fn new(cache: Arc<CacheService>, verifier: Arc<dyn CertVerifier>) -> Self {
        Self {
            coalescer: Coalescer::new(cache),
            verifier,
        }
    }

    /// Look up a certificate, verifying upstream at most once per week
    pub async fn lookup_cert(
        &self,
        company: GradingCompany,
        cert_number: &str,
    ) -> Result<CertRecord, SourceError> {
        let cert_number = cert_number.trim();
        if cert_number.is_empty() {
            return Err(SourceError::NotFound("empty certificate number".to_string()));
        }

        let key = CacheKey::cert(company.as_str(), cert_number);
        self.coalescer
            .with_coalescing(&key, CacheTtl::CERT, || {
                self.verifier.verify(company, cert_number)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::{ManualClock, SystemClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Verifier that takes `delay` per scrape and counts calls
    struct SlowVerifier {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl SlowVerifier {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CertVerifier for SlowVerifier {
        async fn verify(
            &self,
            company: GradingCompany,
            cert_number: &str,
        ) -> Result<CertRecord, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if cert_number == "00000000" {
                return Err(SourceError::NotFound(cert_number.to_string()));
            }
            Ok(CertRecord {
                company,
                cert_number: cert_number.to_string(),
                card_name: "Charizard Holo".to_string(),
                grade: "PSA 10".to_string(),
                year: Some(1999),
                verified_at: 1_700_000_000_000,
            })
        }
    }

    #[tokio::test]
    async fn test_lookup_coalesces_and_refetches_after_delete() {
        let cache = Arc::new(CacheService::in_memory(Arc::new(SystemClock)));
        let verifier = SlowVerifier::new(Duration::from_millis(500));
        let service = CertService::new(cache.clone(), verifier.clone());

        let first = service.lookup_cert(GradingCompany::Psa, "12345678");
        let second = async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            service.lookup_cert(GradingCompany::Psa, "12345678").await
        };
        let (first, second) = tokio::join!(first, second);

        let first = first.unwrap();
        assert_eq!(first, second.unwrap());
        assert_eq!(first.cert_number, "12345678");
        assert_eq!(verifier.calls(), 1);

        cache
            .delete(&CacheKey::cert("psa", "12345678"))
            .await
            .unwrap();
        let third = service
            .lookup_cert(GradingCompany::Psa, "12345678")
            .await
            .unwrap();
        assert_eq!(third, first);
        assert_eq!(verifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_cert_retained_for_a_week() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Arc::new(CacheService::in_memory(clock.clone()));
        let verifier = SlowVerifier::new(Duration::ZERO);
        let service = CertService::new(cache.clone(), verifier.clone());
        let key = CacheKey::cert("psa", "12345678");

        let record = service
            .lookup_cert(GradingCompany::Psa, "12345678")
            .await
            .unwrap();

        clock.advance(CacheTtl::CERT - Duration::from_secs(1));
        assert_eq!(cache.get::<CertRecord>(&key).await.unwrap(), Some(record));
        service
            .lookup_cert(GradingCompany::Psa, " 12345678 ")
            .await
            .unwrap();
        assert_eq!(verifier.calls(), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get::<CertRecord>(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let cache = Arc::new(CacheService::in_memory(Arc::new(SystemClock)));
        let verifier = SlowVerifier::new(Duration::ZERO);
        let service = CertService::new(cache.clone(), verifier.clone());

        for _ in 0..2 {
            let result = service.lookup_cert(GradingCompany::Bgs, "00000000").await;
            assert!(matches!(result, Err(SourceError::NotFound(_))));
        }
        assert_eq!(verifier.calls(), 2);
        assert!(!cache.exists(&CacheKey::cert("bgs", "00000000")).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_cert_number_rejected() {
        let cache = Arc::new(CacheService::in_memory(Arc::new(SystemClock)));
        let verifier = SlowVerifier::new(Duration::ZERO);
        let service = CertService::new(cache, verifier.clone());

        let result = service.lookup_cert(GradingCompany::Psa, "   ").await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
        assert_eq!(verifier.calls(), 0);
    }
}
