//! VirusTotal URL reputation
//!
//! Every call passes the provider's own rate limiter, then the retry policy;
//! answers land in the shared API cache keyed by the URL's SHA-256.

use base64::Engine;
use sase_resilience::{RateLimiter, RetryPolicy, TtlCache};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use super::{ReputationProvider, ReputationReport};
use crate::config::VirusTotalSettings;
use crate::error::ConfigError;
use crate::http::{build_client, get_json, ExternalError};

const PROVIDER: &str = "virustotal";

/// Engines flagging a URL before it counts as known bad
const KNOWN_BAD_DETECTIONS: u32 = 5;

#[derive(Debug, Deserialize)]
struct VtUrlResponse {
    data: VtUrlData,
}

#[derive(Debug, Deserialize)]
struct VtUrlData {
    attributes: VtUrlAttributes,
}

#[derive(Debug, Deserialize)]
struct VtUrlAttributes {
    #[serde(default)]
    last_analysis_stats: VtAnalysisStats,
}

/// Engine verdict counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct VtAnalysisStats {
    /// Engines flagging malicious
    #[serde(default)]
    pub malicious: u32,
    /// Engines flagging suspicious
    #[serde(default)]
    pub suspicious: u32,
    /// Engines reporting clean
    #[serde(default)]
    pub harmless: u32,
    /// Engines with no opinion
    #[serde(default)]
    pub undetected: u32,
}

impl VtAnalysisStats {
    /// Engines that reported
    pub fn total(&self) -> u32 {
        self.malicious + self.suspicious + self.harmless + self.undetected
    }

    /// 0..=100 reputation; suspicious verdicts count half, no verdicts is unknown (50)
    pub fn reputation(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 50.0;
        }
        let bad = self.malicious as f64 + self.suspicious as f64 * 0.5;
        100.0 * (1.0 - bad / total as f64)
    }
}

/// VirusTotal v3 URL lookups
pub struct VirusTotalProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    limiter_wait: Duration,
    cache: Arc<TtlCache<String, ReputationReport>>,
}

impl VirusTotalProvider {
    /// Provider from settings; fails without an API key
    pub fn new(
        settings: &VirusTotalSettings,
        cache: Arc<TtlCache<String, ReputationReport>>,
    ) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("virustotal api_key is not set".into()))?;

        let limiter = RateLimiter::new(PROVIDER, settings.limiter_config())?;

        Ok(Self {
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client: build_client(
                Duration::from_millis(settings.connect_timeout_ms),
                Duration::from_millis(settings.read_timeout_ms),
            )?,
            limiter: Arc::new(limiter),
            retry: settings.retry_policy(),
            limiter_wait: Duration::from_millis(settings.limiter_wait_ms),
            cache,
        })
    }

    /// URL identifier: unpadded URL-safe base64 of the URL
    pub fn url_id(url: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(url)
    }

    /// Cache key: provider prefix plus SHA-256 of the URL
    pub fn cache_key(url: &str) -> String {
        format!("{PROVIDER}:{}", hex::encode(Sha256::digest(url.as_bytes())))
    }

    /// Provider quota
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn fetch(&self, url: &str) -> Result<ReputationReport, ExternalError> {
        if !self.limiter.wait_if_needed(PROVIDER, self.limiter_wait).await {
            return Err(ExternalError::RateLimited {
                retry_after: Some(self.limiter.retry_after(PROVIDER)),
            });
        }

        let request = self
            .client
            .get(format!("{}/urls/{}", self.base_url, Self::url_id(url)))
            .header("x-apikey", &self.api_key)
            .header("Accept", "application/json");

        match get_json::<VtUrlResponse>(request).await {
            Ok(resp) => Ok(report_from_stats(&resp.data.attributes.last_analysis_stats)),
            Err(e) if e.is_not_found() => {
                Ok(ReputationReport::new(PROVIDER, 50.0).with_finding("URL not previously analyzed"))
            }
            Err(e) => Err(e),
        }
    }
}

fn report_from_stats(stats: &VtAnalysisStats) -> ReputationReport {
    let mut report = ReputationReport::new(PROVIDER, stats.reputation());
    if stats.malicious > 0 || stats.suspicious > 0 {
        report = report.with_finding(format!(
            "{} of {} engines flag the URL ({} malicious, {} suspicious)",
            stats.malicious + stats.suspicious,
            stats.total(),
            stats.malicious,
            stats.suspicious
        ));
    }
    if stats.malicious >= KNOWN_BAD_DETECTIONS {
        report = report.known_bad();
    }
    report
}

#[async_trait::async_trait]
impl ReputationProvider for VirusTotalProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn lookup(&self, url: &url::Url, _host: &str) -> Result<ReputationReport, ExternalError> {
        let url = url.as_str();
        let key = Self::cache_key(url);
        if let Some(report) = self.cache.get(&key) {
            tracing::debug!(provider = PROVIDER, "reputation cache hit");
            return Ok(report);
        }

        let result = self.retry.execute("virustotal.lookup_url", move || self.fetch(url)).await;

        match &result {
            Ok(report) => self.cache.insert(key, report.clone()),
            Err(ExternalError::Authentication(status)) => {
                tracing::error!(provider = PROVIDER, status, "API key rejected");
            }
            Err(ExternalError::RateLimited { retry_after }) => {
                tracing::warn!(
                    provider = PROVIDER,
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "rate limited"
                );
            }
            Err(e) => tracing::warn!(provider = PROVIDER, error = %e, "lookup failed"),
        }

        result
    }
}
