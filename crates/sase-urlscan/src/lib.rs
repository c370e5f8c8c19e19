//! OpenSASE URL Risk Scanner (OURS)
//!
//! Assigns one verdict to a submitted URL (optionally with fetched page
//! content) by fusing independent, individually unreliable detection layers.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        URL RISK SCANNER                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │ Artifact (URL + optional HTML / scripts / headers)                  │
//! │        │  validate                                                  │
//! │        ▼                                                            │
//! │ ┌────────────────┐  max_concurrent_scans semaphore                  │
//! │ │    Scanner     │                                                  │
//! │ └───────┬────────┘                                                  │
//! │         ▼                                                           │
//! │ ┌──────────────────────────────────────────────────────────────┐   │
//! │ │ Coordinator: one task per analyzer, per-call timeout          │   │
//! │ │  Lexical │ Headers │ ThreatIntel │ Signature │ ML │ Behavior  │   │
//! │ └───────┬──────────────────┬───────────────────────────────────┘   │
//! │         │                  │ TtlCache / RateLimiter / RetryPolicy   │
//! │         ▼                                                           │
//! │ ┌────────────────┐                                                  │
//! │ │  Aggregation   │ weighted sum + override rules (or vote hybrid)   │
//! │ └───────┬────────┘                                                  │
//! │         ▼                                                           │
//! │  BENIGN / SUSPICIOUS / MALICIOUS  + LOW..CRITICAL                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All analysis is passive: nothing is fetched or executed on behalf of the
//! artifact. Every failure past validation degrades to a neutral score.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

pub mod error;
pub mod config;
pub mod http;
pub mod intel;
pub mod analyzers;
pub mod coordinator;
pub mod aggregation;
pub mod voting;
pub mod context;
pub mod scanner;

pub use error::{AnalyzerError, ConfigError, ScanError, ScanResult, ValidationError};
pub use config::{AggregationPolicy, ScanConfig, WeightConfig};
pub use analyzers::{Analyzer, AnalyzerRegistry};
pub use coordinator::{ConcurrencyCoordinator, CoordinatorOutcome};
pub use aggregation::AggregationEngine;
pub use voting::VotingEngine;
pub use context::ScanContext;
pub use scanner::UrlScanner;

/// Longest URL accepted for analysis
pub const MAX_URL_LENGTH: usize = 8192;

// =============================================================================
// Artifact
// =============================================================================

/// Fetched page content accompanying a URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBundle {
    /// Raw HTML document
    pub html: Option<String>,
    /// External or extracted script bodies
    pub scripts: Vec<String>,
    /// Response headers keyed by lower-case name
    pub headers: HashMap<String, String>,
}

impl ContentBundle {
    /// Bundle holding only an HTML document
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Default::default()
        }
    }

    /// Add a response header; repeated names are joined with a newline
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        self.headers
            .entry(name.trim().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(&value);
            })
            .or_insert(value);
        self
    }

    /// Add a script body
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.scripts.push(script.into());
        self
    }

    /// Header lookup by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether there is anything to analyze beyond headers
    pub fn has_document(&self) -> bool {
        self.html.as_deref().is_some_and(|h| !h.trim().is_empty()) || !self.scripts.is_empty()
    }
}

/// The thing being scored; immutable once submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Submitted URL, as received
    pub url: String,
    /// Optional fetched content
    pub content: Option<ContentBundle>,
}

impl Artifact {
    /// URL-only artifact
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: None,
        }
    }

    /// URL with fetched content
    pub fn with_content(url: impl Into<String>, content: ContentBundle) -> Self {
        Self {
            url: url.into(),
            content: Some(content),
        }
    }

    /// Pre-flight validation; the only failure a scan can surface
    pub fn validate(&self) -> Result<url::Url, ValidationError> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        if raw.len() > MAX_URL_LENGTH {
            return Err(ValidationError::TooLong {
                len: raw.len(),
                max: MAX_URL_LENGTH,
            });
        }

        let parsed = url::Url::parse(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingHost);
        }

        Ok(parsed)
    }

    /// Parsed URL, `None` if invalid
    pub fn parsed_url(&self) -> Option<url::Url> {
        url::Url::parse(self.url.trim()).ok()
    }

    /// Lower-case host, `None` if the URL does not parse
    pub fn host(&self) -> Option<String> {
        self.parsed_url()
            .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_ascii_lowercase()))
    }

    /// HTML document, if any
    pub fn html(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.html.as_deref())
    }

    /// Script bodies, empty if none
    pub fn scripts(&self) -> &[String] {
        self.content.as_ref().map(|c| c.scripts.as_slice()).unwrap_or(&[])
    }

    /// Response headers, if any were supplied
    pub fn headers(&self) -> Option<&HashMap<String, String>> {
        self.content
            .as_ref()
            .map(|c| &c.headers)
            .filter(|h| !h.is_empty())
    }
}

// =============================================================================
// Analyzer Results
// =============================================================================

/// The closed set of detection layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    /// URL string heuristics
    StaticLexical,
    /// Response security headers
    HeaderPolicy,
    /// Reputation providers
    ThreatIntelligence,
    /// Signature rules
    SignatureMatch,
    /// Feature-based model
    MlHeuristic,
    /// HTML and script behavior
    Behavioral,
}

impl AnalyzerKind {
    /// Registry order
    pub const ALL: [AnalyzerKind; 6] = [
        Self::StaticLexical,
        Self::HeaderPolicy,
        Self::ThreatIntelligence,
        Self::SignatureMatch,
        Self::MlHeuristic,
        Self::Behavioral,
    ];

    /// Stable name used in verdicts, config and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::StaticLexical => "static_lexical",
            Self::HeaderPolicy => "header_policy",
            Self::ThreatIntelligence => "threat_intelligence",
            Self::SignatureMatch => "signature_match",
            Self::MlHeuristic => "ml_heuristic",
            Self::Behavioral => "behavioral",
        }
    }

    /// Parse a stable name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name.trim())
    }

    /// Whether the score is a reputation (100 = clean) rather than a risk
    pub fn reports_reputation(&self) -> bool {
        matches!(self, Self::ThreatIntelligence)
    }

    /// Score substituted when the layer fails
    ///
    /// Unknown reputation is neither proof of safety nor danger, so the
    /// reputation layer falls back to the midpoint.
    pub fn neutral_score(&self) -> f64 {
        if self.reports_reputation() {
            50.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one analyzer invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerStatus {
    /// Analyzer produced a score
    Completed,
    /// Analyzer failed; score is neutral
    Error,
    /// Not applicable; excluded from weighting
    Skipped,
}

/// Why an analyzer result carries `status = Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Exceeded the per-call timeout
    Timeout,
    /// Abandoned at the scan deadline
    Cancelled,
    /// Analyzer task panicked
    Panicked,
    /// Provider rejected credentials
    Authentication,
    /// Provider or local quota exhausted
    RateLimited,
    /// External source unreachable or returned garbage
    Unavailable,
    /// Unexpected internal fault
    Internal,
}

impl FailureKind {
    /// Failures where the coordinator had to substitute the result
    pub fn is_substituted(&self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled | Self::Panicked)
    }
}

/// Verdict classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Risk below 40
    Benign,
    /// Risk 40 to 70
    Suspicious,
    /// Risk 70 and above
    Malicious,
}

impl Classification {
    /// Threshold table: ≥ 70 malicious, ≥ 40 suspicious
    pub fn from_risk(risk: f64) -> Self {
        if risk >= 70.0 {
            Self::Malicious
        } else if risk >= 40.0 {
            Self::Suspicious
        } else {
            Self::Benign
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Benign => write!(f, "BENIGN"),
            Self::Suspicious => write!(f, "SUSPICIOUS"),
            Self::Malicious => write!(f, "MALICIOUS"),
        }
    }
}

/// UI-facing severity, independent of classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Risk below 40
    Low,
    /// Risk 40 to 70
    Medium,
    /// Risk 70 to 85
    High,
    /// Risk 85 and above
    Critical,
}

impl RiskLevel {
    /// Threshold table: ≥ 85 critical, ≥ 70 high, ≥ 40 medium
    pub fn from_risk(risk: f64) -> Self {
        if risk >= 85.0 {
            Self::Critical
        } else if risk >= 70.0 {
            Self::High
        } else if risk >= 40.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One analyzer's contribution to a verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerResult {
    /// Layer that produced the result
    pub kind: AnalyzerKind,
    /// Layer name as serialized
    pub name: String,
    /// Risk in [0, 100], or reputation for reputation-reporting layers
    pub score: f64,
    /// Human-readable evidence
    pub findings: Vec<String>,
    /// Completed, errored or skipped
    pub status: AnalyzerStatus,
    /// Why the layer failed, if it did
    pub failure: Option<FailureKind>,
    /// Labels consumed by override rules (`critical`, `exploit`, `known_bad`)
    pub tags: BTreeSet<String>,
    /// Model prediction, ML layers only
    pub prediction: Option<Classification>,
    /// Opaque per-analyzer metadata
    pub extra: serde_json::Value,
    /// Wall time spent in the layer
    pub duration_ms: u64,
}

impl AnalyzerResult {
    /// Successful result; the score is clamped to [0, 100]
    pub fn completed(kind: AnalyzerKind, score: f64, findings: Vec<String>) -> Self {
        Self {
            kind,
            name: kind.name().to_string(),
            score: clamp_score(score, kind.neutral_score()),
            findings,
            status: AnalyzerStatus::Completed,
            failure: None,
            tags: BTreeSet::new(),
            prediction: None,
            extra: serde_json::Value::Null,
            duration_ms: 0,
        }
    }

    /// Failed result carrying the layer's neutral score
    pub fn error(kind: AnalyzerKind, failure: FailureKind, finding: impl Into<String>) -> Self {
        Self {
            status: AnalyzerStatus::Error,
            failure: Some(failure),
            ..Self::completed(kind, kind.neutral_score(), vec![finding.into()])
        }
    }

    /// Failed result from an internal analyzer fault
    pub fn fault(kind: AnalyzerKind, error: AnalyzerError) -> Self {
        Self::error(kind, error.failure_kind(), error.to_string())
    }

    /// Not applicable to this artifact; excluded from weighting
    pub fn skipped(kind: AnalyzerKind, reason: impl Into<String>) -> Self {
        Self {
            status: AnalyzerStatus::Skipped,
            ..Self::completed(kind, kind.neutral_score(), vec![reason.into()])
        }
    }

    /// Add override labels
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Attach the model's own classification
    pub fn with_prediction(mut self, prediction: Classification) -> Self {
        self.prediction = Some(prediction);
        self
    }

    /// Attach per-analyzer metadata
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    /// Record wall time
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    /// Risk contribution: reputation layers are inverted (`100 - reputation`)
    pub fn risk(&self) -> f64 {
        if self.kind.reports_reputation() {
            100.0 - self.score
        } else {
            self.score
        }
    }

    /// Layer errored
    pub fn is_failed(&self) -> bool {
        self.status == AnalyzerStatus::Error
    }

    /// Layer did not apply
    pub fn is_skipped(&self) -> bool {
        self.status == AnalyzerStatus::Skipped
    }

    /// Label present
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

fn clamp_score(score: f64, fallback: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        fallback
    }
}

// =============================================================================
// Verdict
// =============================================================================

/// Final classification for one artifact; computed fresh, never cached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateVerdict {
    /// Unique per scan
    pub scan_id: uuid::Uuid,
    /// Submitted URL
    pub url: String,
    /// Final class
    pub classification: Classification,
    /// Fused risk in [0, 100]
    pub overall_risk: f64,
    /// Severity band of `overall_risk`
    pub risk_level: RiskLevel,
    /// Raw score per layer, keyed by layer name
    pub per_analyzer_scores: BTreeMap<String, f64>,
    /// Per-layer findings plus the deciding rule
    pub findings_summary: Vec<String>,
    /// A layer failed or was substituted
    pub degraded: bool,
    /// Scan wall time
    pub duration_seconds: f64,
    /// Fusion policy that produced the verdict
    pub policy: AggregationPolicy,
    /// Scan completion time
    pub scanned_at: chrono::DateTime<chrono::Utc>,
}

impl AggregateVerdict {
    /// Classified malicious
    pub fn is_malicious(&self) -> bool {
        self.classification == Classification::Malicious
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_http_urls() {
        let parsed = Artifact::new("https://example.com/path?q=1").validate().unwrap();
        assert_eq!(parsed.host_str(), Some("example.com"));
        assert!(Artifact::new("  http://example.org  ").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert_eq!(Artifact::new("   ").validate(), Err(ValidationError::EmptyUrl));
        assert!(matches!(
            Artifact::new("not a url").validate(),
            Err(ValidationError::Malformed(_))
        ));
        assert_eq!(
            Artifact::new("ftp://example.com/file").validate(),
            Err(ValidationError::UnsupportedScheme("ftp".into()))
        );

        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(matches!(
            Artifact::new(long).validate(),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let content = ContentBundle::default()
            .with_header("Set-Cookie", "a=1")
            .with_header("set-cookie", "b=2")
            .with_header("X-Frame-Options", "DENY");

        assert_eq!(content.header("x-frame-options"), Some("DENY"));
        assert_eq!(content.header("SET-COOKIE"), Some("a=1\nb=2"));
        assert!(!content.has_document());
    }

    #[test]
    fn test_result_constructors() {
        let ok = AnalyzerResult::completed(AnalyzerKind::StaticLexical, 140.0, vec![]);
        assert_eq!(ok.score, 100.0);

        let nan = AnalyzerResult::completed(AnalyzerKind::ThreatIntelligence, f64::NAN, vec![]);
        assert_eq!(nan.score, 50.0);

        let failed = AnalyzerResult::error(AnalyzerKind::ThreatIntelligence, FailureKind::Timeout, "timed out");
        assert!(failed.is_failed());
        assert_eq!(failed.score, 50.0);
        assert_eq!(failed.risk(), 50.0);

        let skipped = AnalyzerResult::skipped(AnalyzerKind::Behavioral, "no content");
        assert!(skipped.is_skipped());
        assert_eq!(skipped.score, 0.0);
    }

    #[test]
    fn test_reputation_inverted_to_risk() {
        let clean = AnalyzerResult::completed(AnalyzerKind::ThreatIntelligence, 100.0, vec![]);
        assert_eq!(clean.risk(), 0.0);
        let bad = AnalyzerResult::completed(AnalyzerKind::ThreatIntelligence, 10.0, vec![]);
        assert_eq!(bad.risk(), 90.0);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(Classification::from_risk(69.999), Classification::Suspicious);
        assert_eq!(Classification::from_risk(70.0), Classification::Malicious);
        assert_eq!(Classification::from_risk(39.99), Classification::Benign);
        assert_eq!(RiskLevel::from_risk(85.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_risk(84.9), RiskLevel::High);
        assert_eq!(RiskLevel::from_risk(40.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_risk(0.0), RiskLevel::Low);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in AnalyzerKind::ALL {
            assert_eq!(AnalyzerKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(AnalyzerKind::from_name("plexiglass"), None);
    }
}
