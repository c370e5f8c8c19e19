//! Domain age via RDAP
//!
//! Recently registered domains are a strong phishing indicator. Registration
//! dates are cached in the WHOIS cache; a domain's age only grows, so a long
//! TTL is safe. Registry calls go through their own rate limiter and retry
//! policy, like every other HTTP provider.

use chrono::{DateTime, Utc};
use sase_resilience::{RateLimiter, RetryPolicy, TtlCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{ReputationProvider, ReputationReport};
use crate::config::RdapSettings;
use crate::error::ConfigError;
use crate::http::{build_client, get_json, ExternalError};

const PROVIDER: &str = "rdap";

/// Registration facts for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRegistration {
    /// Registrable domain
    pub domain: String,
    /// Earliest registration event
    pub registered_at: Option<DateTime<Utc>>,
}

impl DomainRegistration {
    /// Whole days since registration
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.registered_at.map(|at| (now - at).num_days())
    }
}

#[derive(Debug, Deserialize)]
struct RdapDomain {
    #[serde(default)]
    events: Vec<RdapEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapEvent {
    event_action: String,
    event_date: Option<String>,
}

/// RDAP registration-date lookups
pub struct RdapProvider {
    base_url: String,
    client: reqwest::Client,
    young_domain_days: i64,
    limiter: RateLimiter,
    retry: RetryPolicy,
    limiter_wait: Duration,
    cache: Arc<TtlCache<String, DomainRegistration>>,
}

impl RdapProvider {
    /// Provider from settings; fails without a base URL
    pub fn new(
        settings: &RdapSettings,
        cache: Arc<TtlCache<String, DomainRegistration>>,
    ) -> Result<Self, ConfigError> {
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("rdap base_url is not set".into()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(
                Duration::from_millis(settings.connect_timeout_ms),
                Duration::from_millis(settings.read_timeout_ms),
            )?,
            young_domain_days: settings.young_domain_days,
            limiter: RateLimiter::new(PROVIDER, settings.limiter_config())?,
            retry: settings.retry_policy(),
            limiter_wait: Duration::from_millis(settings.limiter_wait_ms),
            cache,
        })
    }

    /// Registry quota
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Registration record for `domain`, served from cache when possible
    pub async fn registration(&self, domain: &str) -> Result<DomainRegistration, ExternalError> {
        if let Some(hit) = self.cache.get(&domain.to_string()) {
            return Ok(hit);
        }

        let result = self.retry.execute("rdap.domain", move || self.fetch(domain)).await;
        match &result {
            Ok(registration) => self.cache.insert(domain.to_string(), registration.clone()),
            Err(e) => tracing::warn!(provider = PROVIDER, domain, error = %e, "registration lookup failed"),
        }
        result
    }

    async fn fetch(&self, domain: &str) -> Result<DomainRegistration, ExternalError> {
        if !self.limiter.wait_if_needed(PROVIDER, self.limiter_wait).await {
            return Err(ExternalError::RateLimited {
                retry_after: Some(self.limiter.retry_after(PROVIDER)),
            });
        }

        let request = self
            .client
            .get(format!("{}/domain/{}", self.base_url, domain))
            .header("Accept", "application/rdap+json");
        let record: RdapDomain = get_json(request).await?;

        Ok(DomainRegistration {
            domain: domain.to_string(),
            registered_at: registration_date(&record),
        })
    }

    /// Map domain age onto a reputation
    pub fn assess(&self, registration: &DomainRegistration, now: DateTime<Utc>) -> ReputationReport {
        match registration.age_days(now) {
            Some(days) if days < 7 => ReputationReport::new(PROVIDER, 30.0)
                .with_finding(format!("domain registered {days} days ago")),
            Some(days) if days < self.young_domain_days => ReputationReport::new(PROVIDER, 60.0)
                .with_finding(format!("domain registered {days} days ago")),
            Some(_) => ReputationReport::new(PROVIDER, 100.0),
            None => ReputationReport::new(PROVIDER, 50.0).with_finding("domain registration date unknown"),
        }
    }
}

fn registration_date(record: &RdapDomain) -> Option<DateTime<Utc>> {
    record
        .events
        .iter()
        .filter(|e| e.event_action.eq_ignore_ascii_case("registration"))
        .filter_map(|e| e.event_date.as_deref())
        .filter_map(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc))
        .min()
}

/// Last two labels of a host; IP literals have no registrable domain
pub fn registrable_domain(host: &str) -> Option<String> {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = host.trim_end_matches('.').split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    Some(labels[labels.len() - 2..].join("."))
}

#[async_trait::async_trait]
impl ReputationProvider for RdapProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn lookup(&self, _url: &url::Url, host: &str) -> Result<ReputationReport, ExternalError> {
        let Some(domain) = registrable_domain(host) else {
            return Ok(ReputationReport::new(PROVIDER, 50.0).with_finding("host has no registrable domain"));
        };

        let registration = self.registration(&domain).await?;
        Ok(self.assess(&registration, Utc::now()))
    }
}
