//! Cached host resolution

use sase_resilience::TtlCache;
use std::net::IpAddr;
use std::sync::Arc;

/// System resolver behind the DNS cache
#[derive(Clone)]
pub struct DnsResolver {
    cache: Arc<TtlCache<String, Vec<IpAddr>>>,
}

impl DnsResolver {
    /// Resolver answering from `cache` first
    pub fn new(cache: Arc<TtlCache<String, Vec<IpAddr>>>) -> Self {
        Self { cache }
    }

    /// Addresses for `host`; empty when it does not resolve
    pub async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        let key = host.to_ascii_lowercase();
        if let Some(addrs) = self.cache.get(&key) {
            return addrs;
        }

        if let Ok(ip) = key.parse::<IpAddr>() {
            return vec![ip];
        }

        let addrs: Vec<IpAddr> = match tokio::net::lookup_host((key.as_str(), 0)).await {
            Ok(found) => {
                let mut addrs: Vec<IpAddr> = found.map(|sa| sa.ip()).collect();
                addrs.sort();
                addrs.dedup();
                addrs
            }
            Err(e) => {
                tracing::debug!(host = %key, error = %e, "host did not resolve");
                Vec::new()
            }
        };

        self.cache.insert(key, addrs.clone());
        addrs
    }
}
