//! End-to-end scans through the public API

use std::sync::Arc;
use std::time::{Duration, Instant};

use sase_urlscan::analyzers::ThreatIntelAnalyzer;
use sase_urlscan::http::ExternalError;
use sase_urlscan::intel::{ReputationProvider, ReputationReport};
use sase_urlscan::{
    AggregationPolicy, Analyzer, AnalyzerKind, AnalyzerRegistry, AnalyzerResult, Artifact,
    Classification, ContentBundle, ScanConfig, ScanContext, UrlScanner,
};

struct HangingProvider;

#[async_trait::async_trait]
impl ReputationProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn lookup(&self, _url: &url::Url, _host: &str) -> Result<ReputationReport, ExternalError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ReputationReport::new("hanging", 100.0))
    }
}

struct CrashingBehavioral;

#[async_trait::async_trait]
impl Analyzer for CrashingBehavioral {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Behavioral
    }

    async fn analyze(&self, _artifact: &Artifact) -> AnalyzerResult {
        panic!("parser state corrupted");
    }
}

fn config(per_call_timeout_ms: u64) -> ScanConfig {
    ScanConfig {
        per_call_timeout_ms,
        ..ScanConfig::default()
    }
}

/// Standard layers with one replaced
fn scanner_with(config: ScanConfig, replacement: Arc<dyn Analyzer>) -> UrlScanner {
    let ctx = ScanContext::new(config).unwrap();
    let mut registry = AnalyzerRegistry::from_context(&ctx).unwrap();
    registry.register(replacement);
    UrlScanner::with_registry(ctx, registry)
}

#[tokio::test]
async fn test_clean_url_is_benign() {
    let scanner = UrlScanner::new(ScanConfig::default()).unwrap();
    let verdict = scanner.scan_url("https://example.com/").await.unwrap();

    assert_eq!(verdict.classification, Classification::Benign);
    assert!(!verdict.degraded);
    assert!(verdict.overall_risk < 40.0);
    assert_eq!(verdict.per_analyzer_scores.len(), AnalyzerKind::ALL.len());
}

#[tokio::test]
async fn test_critical_signature_is_malicious() {
    let html = r#"<html><head>
        <script src="https://cdn.example.net/lib/coinhive.min.js"></script>
        </head><body><p>Loading...</p></body></html>"#;
    let artifact = Artifact::with_content("https://games.example.net/play", ContentBundle::html(html));

    let scanner = UrlScanner::new(ScanConfig::default()).unwrap();
    let verdict = scanner.scan(artifact).await.unwrap();

    assert_eq!(verdict.classification, Classification::Malicious);
    assert!(verdict.overall_risk < 70.0, "won on the override, not the threshold");
    assert!(verdict
        .findings_summary
        .iter()
        .any(|f| f == "override: critical signature match"));
}

#[tokio::test]
async fn test_threat_intel_timeout_degrades_to_neutral() {
    let scanner = scanner_with(
        config(100),
        Arc::new(ThreatIntelAnalyzer::new(vec![Arc::new(HangingProvider)])),
    );

    let start = Instant::now();
    let verdict = scanner.scan_url("https://example.com/").await.unwrap();

    assert!(start.elapsed() < Duration::from_millis(100 + 400));
    assert!(verdict.degraded);
    assert_eq!(verdict.per_analyzer_scores["threat_intelligence"], 50.0);
    // neutral reputation 50 contributes risk 50 × 0.25
    assert!(verdict.overall_risk >= 12.5);
    assert_eq!(verdict.classification, Classification::Benign);
}

#[tokio::test]
async fn test_scan_deadline_keeps_signature_override() {
    let config = ScanConfig {
        per_call_timeout_ms: 5_000,
        scan_deadline_ms: Some(300),
        ..ScanConfig::default()
    };
    let scanner = scanner_with(
        config,
        Arc::new(ThreatIntelAnalyzer::new(vec![Arc::new(HangingProvider)])),
    );
    let html = r#"<html><script src="https://cdn.example.net/lib/coinhive.min.js"></script></html>"#;
    let artifact = Artifact::with_content("https://games.example.net/play", ContentBundle::html(html));

    let verdict = scanner.scan(artifact).await.unwrap();

    assert!(verdict.degraded);
    assert_eq!(verdict.per_analyzer_scores["threat_intelligence"], 50.0);
    assert_eq!(verdict.per_analyzer_scores["signature_match"], 95.0);
    assert_eq!(verdict.classification, Classification::Malicious);
}

#[tokio::test]
async fn test_crashing_analyzer_is_isolated() {
    let scanner = scanner_with(config(1_000), Arc::new(CrashingBehavioral));
    let artifact = Artifact::with_content(
        "https://example.com/",
        ContentBundle::html("<html><body>hello</body></html>"),
    );

    let verdict = scanner.scan(artifact).await.unwrap();

    assert_eq!(verdict.per_analyzer_scores["behavioral"], 0.0);
    assert!(verdict.degraded);
    assert_eq!(verdict.classification, Classification::Benign);
}

#[tokio::test]
async fn test_same_artifact_same_verdict() {
    let scanner = UrlScanner::new(ScanConfig::default()).unwrap();
    let url = "http://paypa1.com.secure-login.example.tk/account/verify?session=8812";

    let first = scanner.scan_url(url).await.unwrap();
    let second = scanner.scan_url(url).await.unwrap();

    assert_eq!(first.overall_risk, second.overall_risk);
    assert_eq!(first.classification, second.classification);
    assert_eq!(first.findings_summary, second.findings_summary);
    assert_eq!(first.per_analyzer_scores, second.per_analyzer_scores);
    assert_ne!(first.scan_id, second.scan_id);
    assert!((0.0..=100.0).contains(&first.overall_risk));
}

#[tokio::test]
async fn test_blocklisted_host_under_both_policies() {
    let mut weighted = ScanConfig::default();
    weighted.providers.blocklist = vec!["evil.example".into()];
    let mut vote = weighted.clone();
    vote.policy = AggregationPolicy::VoteHybrid;

    let url = "https://evil.example/";
    let by_weight = UrlScanner::new(weighted).unwrap().scan_url(url).await.unwrap();
    let by_vote = UrlScanner::new(vote).unwrap().scan_url(url).await.unwrap();

    assert_eq!(by_weight.per_analyzer_scores["threat_intelligence"], 0.0);
    assert_eq!(by_weight.classification, Classification::Benign);
    assert_eq!(by_vote.classification, Classification::Malicious);
    assert_eq!(by_weight.overall_risk, by_vote.overall_risk);
}

#[tokio::test]
async fn test_verdict_serializes_flat() {
    let scanner = UrlScanner::new(ScanConfig::default()).unwrap();
    let verdict = scanner.scan_url("https://example.com/").await.unwrap();
    let json = serde_json::to_value(&verdict).unwrap();

    assert_eq!(json["classification"], "BENIGN");
    assert_eq!(json["risk_level"], "LOW");
    assert_eq!(json["degraded"], false);
    assert_eq!(json["policy"], "weighted_override");
    assert!(json["per_analyzer_scores"]["static_lexical"].is_number());
    assert!(json["duration_seconds"].is_number());
}
