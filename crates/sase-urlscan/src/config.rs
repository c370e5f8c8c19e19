//! Scanner configuration
//!
//! Loaded from JSON, then overlaid with `URLSCAN_*` environment variables.
//! Every field has a default so a partial file is enough.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sase_resilience::{RateLimiterConfig, RetryPolicy};

use crate::error::ConfigError;
use crate::AnalyzerKind;

/// Tolerance for the weight-sum check
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Weights
// =============================================================================

/// Per-analyzer contribution to the weighted risk; must sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Weight of the URL lexical layer
    pub static_lexical: f64,
    /// Weight of the response header checks
    pub header_policy: f64,
    /// Weight of the reputation layer (applied to inverted reputation)
    pub threat_intelligence: f64,
    /// Weight of the signature rules
    pub signature_match: f64,
    /// Weight of the heuristic model
    pub ml_heuristic: f64,
    /// Weight of the page behavior checks
    pub behavioral: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            static_lexical: 0.15,
            header_policy: 0.10,
            threat_intelligence: 0.25,
            signature_match: 0.20,
            ml_heuristic: 0.15,
            behavioral: 0.15,
        }
    }
}

impl WeightConfig {
    /// Build from explicit pairs; kinds not listed weigh 0
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (AnalyzerKind, f64)>,
    {
        let mut weights = Self {
            static_lexical: 0.0,
            header_policy: 0.0,
            threat_intelligence: 0.0,
            signature_match: 0.0,
            ml_heuristic: 0.0,
            behavioral: 0.0,
        };
        for (kind, weight) in pairs {
            *weights.slot(kind) = weight;
        }
        weights.validate()?;
        Ok(weights)
    }

    /// Weight of one analyzer
    pub fn weight(&self, kind: AnalyzerKind) -> f64 {
        match kind {
            AnalyzerKind::StaticLexical => self.static_lexical,
            AnalyzerKind::HeaderPolicy => self.header_policy,
            AnalyzerKind::ThreatIntelligence => self.threat_intelligence,
            AnalyzerKind::SignatureMatch => self.signature_match,
            AnalyzerKind::MlHeuristic => self.ml_heuristic,
            AnalyzerKind::Behavioral => self.behavioral,
        }
    }

    fn slot(&mut self, kind: AnalyzerKind) -> &mut f64 {
        match kind {
            AnalyzerKind::StaticLexical => &mut self.static_lexical,
            AnalyzerKind::HeaderPolicy => &mut self.header_policy,
            AnalyzerKind::ThreatIntelligence => &mut self.threat_intelligence,
            AnalyzerKind::SignatureMatch => &mut self.signature_match,
            AnalyzerKind::MlHeuristic => &mut self.ml_heuristic,
            AnalyzerKind::Behavioral => &mut self.behavioral,
        }
    }

    /// Total of all weights
    pub fn sum(&self) -> f64 {
        AnalyzerKind::ALL.iter().map(|k| self.weight(*k)).sum()
    }

    /// Weights are finite, non-negative and sum to 1.0
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in AnalyzerKind::ALL {
            let weight = self.weight(kind);
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    analyzer: kind.name().to_string(),
                    weight,
                });
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Aggregation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Weighted sum with override rules
    #[default]
    WeightedOverride,
    /// Vote counting blended with weighted risk
    VoteHybrid,
}

impl std::str::FromStr for AggregationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted" | "weighted_override" => Ok(Self::WeightedOverride),
            "vote" | "vote_hybrid" => Ok(Self::VoteHybrid),
            other => Err(ConfigError::Invalid(format!("unknown policy '{other}'"))),
        }
    }
}

/// Vote-hybrid tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Sources whose vote counts `high_confidence_weight` times
    pub high_confidence: Vec<AnalyzerKind>,
    /// Votes cast by each high-confidence source
    pub high_confidence_weight: u32,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            high_confidence: vec![AnalyzerKind::SignatureMatch],
            high_confidence_weight: 2,
        }
    }
}

// =============================================================================
// Caches & Providers
// =============================================================================

/// Size and lifetime budget of one cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBudget {
    /// Maximum live entries
    pub capacity: usize,
    /// Entry lifetime; 0 never expires
    pub ttl_secs: u64,
}

impl CacheBudget {
    /// Entry lifetime as a `Duration`
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Per-concern cache budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Resolved host addresses
    pub dns: CacheBudget,
    /// Domain registration records
    pub whois: CacheBudget,
    /// Provider API answers
    pub api: CacheBudget,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dns: CacheBudget { capacity: 1000, ttl_secs: 300 },
            whois: CacheBudget { capacity: 500, ttl_secs: 86_400 },
            api: CacheBudget { capacity: 1000, ttl_secs: 3600 },
        }
    }
}

/// VirusTotal-style reputation API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirusTotalSettings {
    /// Provider disabled when absent
    pub api_key: Option<String>,
    /// API root, without trailing slash
    pub base_url: String,
    /// Requests admitted per window
    pub rate_limit: u32,
    /// Rate-limit window length
    pub window_secs: u64,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// Whole-request read timeout
    pub read_timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay
    pub base_delay_ms: u64,
    /// Backoff and `Retry-After` cap
    pub max_delay_ms: u64,
    /// Wait after a 429 that carries no `Retry-After`
    pub default_retry_after_ms: u64,
    /// Longest wait for a rate-limiter slot before giving up
    pub limiter_wait_ms: u64,
}

impl Default for VirusTotalSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://www.virustotal.com/api/v3".into(),
            rate_limit: 4,
            window_secs: 60,
            connect_timeout_ms: 3000,
            read_timeout_ms: 10_000,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            default_retry_after_ms: 30_000,
            limiter_wait_ms: 0,
        }
    }
}

impl VirusTotalSettings {
    /// An API key is configured
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Quota for this provider's limiter
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.rate_limit, Duration::from_secs(self.window_secs))
    }

    /// Retry policy for this provider's calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            default_retry_after: Duration::from_millis(self.default_retry_after_ms),
        }
    }
}

/// RDAP domain registration lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdapSettings {
    /// Lookups disabled when absent
    pub base_url: Option<String>,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// Whole-request read timeout
    pub read_timeout_ms: u64,
    /// Domains registered more recently than this are "young"
    pub young_domain_days: i64,
    /// Requests admitted per window
    pub rate_limit: u32,
    /// Rate-limit window length
    pub window_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay
    pub base_delay_ms: u64,
    /// Backoff and `Retry-After` cap
    pub max_delay_ms: u64,
    /// Wait after a 429 that carries no `Retry-After`
    pub default_retry_after_ms: u64,
    /// Longest wait for a rate-limiter slot before giving up
    pub limiter_wait_ms: u64,
}

impl Default for RdapSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout_ms: 3000,
            read_timeout_ms: 5000,
            young_domain_days: 30,
            rate_limit: 10,
            window_secs: 60,
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            default_retry_after_ms: 10_000,
            limiter_wait_ms: 0,
        }
    }
}

impl RdapSettings {
    /// Quota for the registry's limiter
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.rate_limit, Duration::from_secs(self.window_secs))
    }

    /// Retry policy for registry calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            default_retry_after: Duration::from_millis(self.default_retry_after_ms),
        }
    }
}

/// Reputation sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// VirusTotal API access
    pub virustotal: VirusTotalSettings,
    /// Locally known-bad domains; subdomains match too
    pub blocklist: Vec<String>,
    /// RDAP registration lookups
    pub rdap: RdapSettings,
}

// =============================================================================
// Scan Config
// =============================================================================

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-analyzer timeout
    pub per_call_timeout_ms: u64,
    /// Overall scan deadline; unbounded when absent
    pub scan_deadline_ms: Option<u64>,
    /// Scans running at once; further scans queue
    pub max_concurrent_scans: usize,
    /// Per-layer weights for the weighted policy
    pub weights: WeightConfig,
    /// Fusion policy
    pub policy: AggregationPolicy,
    /// Vote-hybrid settings
    pub voting: VotingConfig,
    /// Cache budgets
    pub cache: CacheSettings,
    /// Reputation sources
    pub providers: ProviderSettings,
    /// Resolve hosts during lexical analysis
    pub resolve_dns: bool,
    /// Extra signature rules (JSON array)
    pub signatures_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            per_call_timeout_ms: 10_000,
            scan_deadline_ms: Some(30_000),
            max_concurrent_scans: 4,
            weights: WeightConfig::default(),
            policy: AggregationPolicy::default(),
            voting: VotingConfig::default(),
            cache: CacheSettings::default(),
            providers: ProviderSettings::default(),
            resolve_dns: false,
            signatures_path: None,
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `URLSCAN_*` process environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from an arbitrary lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("URLSCAN_PER_CALL_TIMEOUT_MS") {
            self.per_call_timeout_ms = parse_var("URLSCAN_PER_CALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("URLSCAN_SCAN_DEADLINE_MS") {
            self.scan_deadline_ms = match v.trim() {
                "" | "none" => None,
                raw => Some(parse_var("URLSCAN_SCAN_DEADLINE_MS", raw)?),
            };
        }
        if let Some(v) = lookup("URLSCAN_MAX_CONCURRENT_SCANS") {
            self.max_concurrent_scans = parse_var("URLSCAN_MAX_CONCURRENT_SCANS", &v)?;
        }
        if let Some(v) = lookup("URLSCAN_POLICY") {
            self.policy = v.parse()?;
        }
        if let Some(v) = lookup("URLSCAN_RESOLVE_DNS") {
            self.resolve_dns = parse_var("URLSCAN_RESOLVE_DNS", &v)?;
        }
        if let Some(v) = lookup("URLSCAN_VIRUSTOTAL_API_KEY") {
            self.providers.virustotal.api_key = Some(v).filter(|k| !k.trim().is_empty());
        }
        if let Some(v) = lookup("URLSCAN_VIRUSTOTAL_BASE_URL") {
            self.providers.virustotal.base_url = v;
        }
        if let Some(v) = lookup("URLSCAN_RDAP_BASE_URL") {
            self.providers.rdap.base_url = Some(v).filter(|u| !u.trim().is_empty());
        }
        if let Some(v) = lookup("URLSCAN_BLOCKLIST") {
            self.providers.blocklist.extend(
                v.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(())
    }

    /// Reject settings the scanner cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;

        if self.per_call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("per_call_timeout_ms must be > 0".into()));
        }
        if self.scan_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid("scan_deadline_ms must be > 0".into()));
        }
        if self.max_concurrent_scans == 0 {
            return Err(ConfigError::Invalid("max_concurrent_scans must be > 0".into()));
        }
        if self.voting.high_confidence_weight == 0 {
            return Err(ConfigError::Invalid("high_confidence_weight must be > 0".into()));
        }

        for (name, budget) in [
            ("dns", self.cache.dns),
            ("whois", self.cache.whois),
            ("api", self.cache.api),
        ] {
            if budget.capacity == 0 {
                return Err(ConfigError::Invalid(format!("{name} cache capacity must be > 0")));
            }
        }

        let vt = &self.providers.virustotal;
        if vt.is_enabled() {
            if vt.rate_limit == 0 || vt.window_secs == 0 {
                return Err(ConfigError::Invalid("virustotal rate limit must be > 0".into()));
            }
            if vt.connect_timeout_ms == 0 || vt.read_timeout_ms == 0 {
                return Err(ConfigError::Invalid("virustotal timeouts must be > 0".into()));
            }
            url::Url::parse(&vt.base_url)
                .map_err(|e| ConfigError::Invalid(format!("virustotal base_url: {e}")))?;
        }

        let rdap = &self.providers.rdap;
        if let Some(base) = &rdap.base_url {
            if rdap.rate_limit == 0 || rdap.window_secs == 0 {
                return Err(ConfigError::Invalid("rdap rate limit must be > 0".into()));
            }
            url::Url::parse(base).map_err(|e| ConfigError::Invalid(format!("rdap base_url: {e}")))?;
        }

        Ok(())
    }

    /// Per-analyzer budget
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Whole-scan budget, if any
    pub fn scan_deadline(&self) -> Option<Duration> {
        self.scan_deadline_ms.map(Duration::from_millis)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{name}: {e}")))
}
