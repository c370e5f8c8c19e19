//! Local domain blocklist

use std::collections::HashSet;

use super::{ReputationProvider, ReputationReport};
use crate::http::ExternalError;

/// Known-bad domains; a listed domain also covers its subdomains
pub struct BlocklistProvider {
    domains: HashSet<String>,
}

impl BlocklistProvider {
    /// Blocklist over `domains`; case and trailing dots are ignored
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    /// Number of blocked domains
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// No domains blocked
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Listed entry covering `host`, if any
    pub fn matching_entry(&self, host: &str) -> Option<&str> {
        let host = host.trim_end_matches('.');
        let mut candidate = host;
        loop {
            if let Some(entry) = self.domains.get(candidate) {
                return Some(entry.as_str());
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return None,
            }
        }
    }
}

#[async_trait::async_trait]
impl ReputationProvider for BlocklistProvider {
    fn name(&self) -> &str {
        "blocklist"
    }

    async fn lookup(&self, _url: &url::Url, host: &str) -> Result<ReputationReport, ExternalError> {
        Ok(match self.matching_entry(host) {
            Some(entry) => ReputationReport::new(self.name(), 0.0)
                .with_finding(format!("host matches blocklisted domain {entry}"))
                .known_bad(),
            None => ReputationReport::new(self.name(), 100.0),
        })
    }
}
