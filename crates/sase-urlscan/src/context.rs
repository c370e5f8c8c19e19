//! Shared scan resources
//!
//! Built once per scanner and handed to analyzers by `Arc`. Caches, rate
//! limiters and HTTP clients live here and nowhere else.

use std::sync::Arc;

use crate::analyzers::SignatureDb;
use crate::config::ScanConfig;
use crate::error::ConfigError;
use crate::intel::{BlocklistProvider, CacheSet, DnsResolver, RdapProvider, ReputationProvider, VirusTotalProvider};

/// Long-lived resources shared by every scan
pub struct ScanContext {
    /// Validated configuration
    pub config: ScanConfig,
    /// Shared DNS, WHOIS and API caches
    pub caches: Arc<CacheSet>,
    /// Resolver over the DNS cache
    pub dns: DnsResolver,
    /// Enabled reputation sources, in lookup order
    pub providers: Vec<Arc<dyn ReputationProvider>>,
    /// Compiled signature rules
    pub signatures: Arc<SignatureDb>,
}

impl ScanContext {
    /// Validate `config` and build every shared resource it describes
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let caches = Arc::new(CacheSet::new(&config.cache)?);
        let dns = DnsResolver::new(caches.dns.clone());

        let mut providers: Vec<Arc<dyn ReputationProvider>> = Vec::new();
        if !config.providers.blocklist.is_empty() {
            providers.push(Arc::new(BlocklistProvider::new(&config.providers.blocklist)));
        }
        if config.providers.virustotal.is_enabled() {
            providers.push(Arc::new(VirusTotalProvider::new(
                &config.providers.virustotal,
                caches.api.clone(),
            )?));
        }
        if config.providers.rdap.base_url.is_some() {
            providers.push(Arc::new(RdapProvider::new(&config.providers.rdap, caches.whois.clone())?));
        }

        let mut signatures = SignatureDb::default_signatures();
        if let Some(path) = &config.signatures_path {
            signatures.extend(SignatureDb::load_rules(path)?);
        }
        let signatures = Arc::new(SignatureDb::new(signatures)?);

        tracing::debug!(
            providers = providers.len(),
            signatures = signatures.len(),
            "scan context ready"
        );

        Ok(Self {
            config,
            caches,
            dns,
            providers,
            signatures,
        })
    }

    /// Names of the enabled reputation sources
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }
}
