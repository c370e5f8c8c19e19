//! Verdict Fusion
//!
//! Weighted sum of per-layer risk with a short list of override rules that
//! can escalate the threshold classification. Pure: the same results always
//! produce the same verdict.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{AggregationPolicy, WeightConfig};
use crate::{AggregateVerdict, AnalyzerKind, AnalyzerResult, Classification, RiskLevel};

/// Signature tags that force a malicious verdict
pub const ESCALATING_SIGNATURE_TAGS: [&str; 2] = ["critical", "exploit"];

/// Weighted risk the ML layer must be backed by to force a malicious verdict
pub const ML_OVERRIDE_MIN_RISK: f64 = 60.0;

/// Which override rule decided the classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Override {
    /// A critical or exploit signature fired
    CriticalSignature,
    /// The model and the weighted risk agree
    MlConsensus,
}

impl Override {
    fn describe(&self) -> &'static str {
        match self {
            Self::CriticalSignature => "override: critical signature match",
            Self::MlConsensus => "override: model predicts malicious with elevated weighted risk",
        }
    }
}

/// Default fusion policy: weighted risk plus overrides
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    weights: WeightConfig,
}

impl AggregationEngine {
    /// Engine over validated weights
    pub fn new(weights: WeightConfig) -> Self {
        Self { weights }
    }

    /// Weights in use
    pub fn weights(&self) -> &WeightConfig {
        &self.weights
    }

    /// Σ weight × risk over non-skipped results, clamped to [0, 100]
    ///
    /// Skipped layers drop out without renormalizing the rest.
    pub fn weighted_risk(&self, results: &[AnalyzerResult]) -> f64 {
        weighted_risk(&self.weights, results)
    }

    /// First override rule that applies, if any
    pub fn find_override(results: &[AnalyzerResult], weighted: f64) -> Option<Override> {
        let critical_signature = results.iter().any(|r| {
            r.kind == AnalyzerKind::SignatureMatch
                && !r.is_skipped()
                && ESCALATING_SIGNATURE_TAGS.iter().any(|t| r.has_tag(t))
        });
        if critical_signature {
            return Some(Override::CriticalSignature);
        }

        let ml_malicious = results.iter().any(|r| {
            r.kind == AnalyzerKind::MlHeuristic
                && !r.is_failed()
                && r.prediction == Some(Classification::Malicious)
        });
        if ml_malicious && weighted >= ML_OVERRIDE_MIN_RISK {
            return Some(Override::MlConsensus);
        }

        None
    }

    /// Classify a weighted risk with the override rules applied
    pub fn classify(&self, results: &[AnalyzerResult]) -> (Classification, f64, Option<Override>) {
        let risk = self.weighted_risk(results);
        match Self::find_override(results, risk) {
            Some(rule) => (Classification::Malicious, risk, Some(rule)),
            None => (Classification::from_risk(risk), risk, None),
        }
    }

    /// Fuse coordinator results into a verdict
    pub fn aggregate(
        &self,
        url: &str,
        results: &[AnalyzerResult],
        elapsed: Duration,
        cancelled: bool,
    ) -> AggregateVerdict {
        let (classification, risk, rule) = self.classify(results);
        let mut summary = summarize(results);
        if let Some(rule) = rule {
            summary.push(rule.describe().to_string());
        }

        assemble(
            url,
            classification,
            risk,
            results,
            summary,
            elapsed,
            cancelled,
            AggregationPolicy::WeightedOverride,
        )
    }
}

pub(crate) fn weighted_risk(weights: &WeightConfig, results: &[AnalyzerResult]) -> f64 {
    let risk: f64 = results
        .iter()
        .filter(|r| !r.is_skipped())
        .map(|r| weights.weight(r.kind) * r.risk())
        .sum();
    risk.clamp(0.0, 100.0)
}

/// Whether the verdict rests on substituted or missing evidence
///
/// A single analyzer erroring on its own (e.g. an exhausted quota) is routine;
/// two or more failures, or any result the coordinator had to substitute,
/// is not.
pub fn is_degraded(results: &[AnalyzerResult], cancelled: bool) -> bool {
    let failed = results.iter().filter(|r| r.is_failed()).count();
    let substituted = results
        .iter()
        .any(|r| r.failure.is_some_and(|f| f.is_substituted()));
    cancelled || failed > 1 || substituted
}

/// `[name] finding` lines in analyzer order
pub(crate) fn summarize(results: &[AnalyzerResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| !r.is_skipped())
        .flat_map(|r| r.findings.iter().map(move |f| format!("[{}] {f}", r.name)))
        .collect()
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn assemble(
    url: &str,
    classification: Classification,
    risk: f64,
    results: &[AnalyzerResult],
    findings_summary: Vec<String>,
    elapsed: Duration,
    cancelled: bool,
    policy: AggregationPolicy,
) -> AggregateVerdict {
    let per_analyzer_scores: BTreeMap<String, f64> =
        results.iter().map(|r| (r.name.clone(), r.score)).collect();

    AggregateVerdict {
        scan_id: uuid::Uuid::new_v4(),
        url: url.to_string(),
        classification,
        overall_risk: risk,
        risk_level: RiskLevel::from_risk(risk),
        per_analyzer_scores,
        findings_summary,
        degraded: is_degraded(results, cancelled),
        duration_seconds: elapsed.as_secs_f64(),
        policy,
        scanned_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    fn completed(kind: AnalyzerKind, score: f64) -> AnalyzerResult {
        AnalyzerResult::completed(kind, score, vec![format!("{kind} looked")])
    }

    /// Every layer reporting the same risk
    fn uniform(risk: f64) -> Vec<AnalyzerResult> {
        AnalyzerKind::ALL
            .iter()
            .map(|&k| {
                let score = if k.reports_reputation() { 100.0 - risk } else { risk };
                completed(k, score)
            })
            .collect()
    }

    fn engine() -> AggregationEngine {
        AggregationEngine::new(WeightConfig::default())
    }

    /// Weights exact in binary so boundary sums carry no rounding
    fn dyadic() -> AggregationEngine {
        let weights = WeightConfig::from_pairs([
            (AnalyzerKind::StaticLexical, 0.5),
            (AnalyzerKind::ThreatIntelligence, 0.25),
            (AnalyzerKind::MlHeuristic, 0.25),
        ])
        .unwrap();
        AggregationEngine::new(weights)
    }

    #[test]
    fn test_uniform_risk_passes_through() {
        let verdict = engine().aggregate("https://example.com/", &uniform(30.0), Duration::ZERO, false);
        assert!((verdict.overall_risk - 30.0).abs() < 1e-9);
        assert_eq!(verdict.classification, Classification::Benign);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert!(!verdict.degraded);
    }

    #[test]
    fn test_threshold_boundary() {
        let engine = dyadic();
        let just_below = engine.classify(&uniform(69.999));
        assert_eq!(just_below.0, Classification::Suspicious);

        let at = engine.classify(&uniform(70.0));
        assert_eq!(at.0, Classification::Malicious);
        assert!((at.1 - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_critical_signature_overrides_low_risk() {
        let mut results = uniform(20.0);
        let sig = results
            .iter_mut()
            .find(|r| r.kind == AnalyzerKind::SignatureMatch)
            .unwrap();
        sig.tags.insert("critical".into());

        let verdict = engine().aggregate("https://example.com/", &results, Duration::ZERO, false);
        assert!((verdict.overall_risk - 20.0).abs() < 1e-9);
        assert_eq!(verdict.classification, Classification::Malicious);
        assert_eq!(
            verdict.findings_summary.last().map(String::as_str),
            Some("override: critical signature match")
        );
    }

    #[test]
    fn test_ml_override_needs_backing_risk() {
        let mut results = uniform(60.0);
        let ml = results
            .iter_mut()
            .find(|r| r.kind == AnalyzerKind::MlHeuristic)
            .unwrap();
        ml.prediction = Some(Classification::Malicious);

        let (class, _, rule) = dyadic().classify(&results);
        assert_eq!(class, Classification::Malicious);
        assert_eq!(rule, Some(Override::MlConsensus));

        let mut weaker = uniform(59.0);
        weaker[4].prediction = Some(Classification::Malicious);
        assert_eq!(dyadic().classify(&weaker).0, Classification::Suspicious);
    }

    #[test]
    fn test_skipped_layers_excluded_without_renormalizing() {
        let results = vec![
            completed(AnalyzerKind::StaticLexical, 100.0),
            AnalyzerResult::skipped(AnalyzerKind::HeaderPolicy, "no headers"),
            AnalyzerResult::skipped(AnalyzerKind::Behavioral, "no content"),
        ];
        // 0.15 × 100
        assert!((engine().weighted_risk(&results) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_reputation_inverted_before_weighting() {
        let results = vec![completed(AnalyzerKind::ThreatIntelligence, 0.0)];
        // 0.25 × (100 - 0)
        assert!((engine().weighted_risk(&results) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_bounded_and_deterministic() {
        let mut results = uniform(100.0);
        for r in &mut results {
            r.score = if r.kind.reports_reputation() { 0.0 } else { 100.0 };
        }
        let engine = engine();
        let first = engine.aggregate("u", &results, Duration::ZERO, false);
        let second = engine.aggregate("u", &results, Duration::ZERO, false);

        assert!(first.overall_risk <= 100.0);
        assert_eq!(first.overall_risk, second.overall_risk);
        assert_eq!(first.classification, second.classification);
        assert_eq!(first.findings_summary, second.findings_summary);
        assert_eq!(first.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_degraded_rule() {
        let single_quota = vec![
            AnalyzerResult::error(AnalyzerKind::ThreatIntelligence, FailureKind::RateLimited, "quota"),
            completed(AnalyzerKind::StaticLexical, 0.0),
        ];
        assert!(!is_degraded(&single_quota, false));
        assert!(is_degraded(&single_quota, true));

        let two_failures = vec![
            AnalyzerResult::error(AnalyzerKind::ThreatIntelligence, FailureKind::Unavailable, "down"),
            AnalyzerResult::error(AnalyzerKind::StaticLexical, FailureKind::Internal, "bad"),
        ];
        assert!(is_degraded(&two_failures, false));

        let timeout = vec![AnalyzerResult::error(
            AnalyzerKind::ThreatIntelligence,
            FailureKind::Timeout,
            "timed out",
        )];
        assert!(is_degraded(&timeout, false));
    }

    #[test]
    fn test_summary_format_and_scores() {
        let results = vec![
            completed(AnalyzerKind::StaticLexical, 10.0),
            completed(AnalyzerKind::ThreatIntelligence, 90.0),
        ];
        let verdict = engine().aggregate("https://example.com/", &results, Duration::from_millis(1500), false);

        assert_eq!(verdict.findings_summary[0], "[static_lexical] static_lexical looked");
        assert_eq!(verdict.per_analyzer_scores["threat_intelligence"], 90.0);
        assert_eq!(verdict.duration_seconds, 1.5);
        assert_eq!(verdict.policy, AggregationPolicy::WeightedOverride);
    }
}
