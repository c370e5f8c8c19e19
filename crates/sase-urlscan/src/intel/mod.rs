//! Threat Intelligence Sources
//!
//! Reputation providers consulted by the threat-intelligence analyzer, plus
//! the DNS resolver and the shared cache set.

use sase_resilience::{CacheStats, TtlCache};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::CacheSettings;
use crate::error::ConfigError;
use crate::http::ExternalError;

pub mod blocklist;
pub mod dns;
pub mod virustotal;
pub mod whois;

pub use blocklist::BlocklistProvider;
pub use dns::DnsResolver;
pub use virustotal::VirusTotalProvider;
pub use whois::{DomainRegistration, RdapProvider};

/// What one provider knows about a URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationReport {
    /// Source name
    pub provider: String,
    /// 0 = known malicious, 100 = clean
    pub reputation: f64,
    /// Evidence behind the reputation
    pub findings: Vec<String>,
    /// Provider has the URL or host on record as malicious
    pub known_bad: bool,
}

impl ReputationReport {
    /// Report with no findings; reputation clamped to [0, 100]
    pub fn new(provider: impl Into<String>, reputation: f64) -> Self {
        Self {
            provider: provider.into(),
            reputation: reputation.clamp(0.0, 100.0),
            findings: Vec::new(),
            known_bad: false,
        }
    }

    /// Add evidence
    pub fn with_finding(mut self, finding: impl Into<String>) -> Self {
        self.findings.push(finding.into());
        self
    }

    /// Mark as on record as malicious
    pub fn known_bad(mut self) -> Self {
        self.known_bad = true;
        self
    }
}

/// A reputation source
#[async_trait::async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Provider name, used in findings and logs
    fn name(&self) -> &str;

    /// Look up a validated URL; `host` is its lower-case host
    async fn lookup(&self, url: &url::Url, host: &str) -> Result<ReputationReport, ExternalError>;
}

// =============================================================================
// Cache Set
// =============================================================================

/// Per-concern caches with independent budgets
pub struct CacheSet {
    /// Resolved addresses
    pub dns: Arc<TtlCache<String, Vec<IpAddr>>>,
    /// Registration records
    pub whois: Arc<TtlCache<String, DomainRegistration>>,
    /// Provider API answers
    pub api: Arc<TtlCache<String, ReputationReport>>,
}

impl CacheSet {
    /// Build all three caches
    pub fn new(settings: &CacheSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            dns: Arc::new(TtlCache::new("dns", settings.dns.capacity, settings.dns.ttl())?),
            whois: Arc::new(TtlCache::new("whois", settings.whois.capacity, settings.whois.ttl())?),
            api: Arc::new(TtlCache::new("api", settings.api.capacity, settings.api.ttl())?),
        })
    }

    /// Snapshot of every cache, keyed by cache name
    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        [
            (self.dns.name(), self.dns.stats()),
            (self.whois.name(), self.whois.stats()),
            (self.api.name(), self.api.stats()),
        ]
        .into_iter()
        .map(|(name, stats)| (name.to_string(), stats))
        .collect()
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.dns.clear();
        self.whois.clear();
        self.api.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_clamps_reputation() {
        assert_eq!(ReputationReport::new("x", 140.0).reputation, 100.0);
        assert_eq!(ReputationReport::new("x", -3.0).reputation, 0.0);
    }

    #[test]
    fn test_cache_set_budgets() {
        let caches = CacheSet::new(&CacheSettings::default()).unwrap();
        let stats = caches.stats();

        assert_eq!(stats.len(), 3);
        assert_eq!(stats["dns"].capacity, 1000);
        assert_eq!(stats["whois"].capacity, 500);

        caches.api.insert("k".into(), ReputationReport::new("vt", 90.0));
        assert_eq!(caches.stats()["api"].size, 1);
        caches.clear();
        assert_eq!(caches.stats()["api"].size, 0);
    }
}
