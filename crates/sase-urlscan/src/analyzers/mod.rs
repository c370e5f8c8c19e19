//! Detection Layers
//!
//! Each analyzer inspects one aspect of an [`Artifact`] and reports a score in
//! [0, 100]. Analyzers never fail: internal faults become `status = Error`
//! with the layer's neutral score.

use std::sync::Arc;

use crate::context::ScanContext;
use crate::error::ConfigError;
use crate::{AnalyzerKind, AnalyzerResult, Artifact};

pub mod behavioral;
pub mod headers;
pub mod lexical;
pub mod ml;
pub mod signature;
pub mod threat_intel;

pub use behavioral::BehavioralAnalyzer;
pub use headers::HeaderPolicyAnalyzer;
pub use lexical::LexicalAnalyzer;
pub use ml::MlHeuristicAnalyzer;
pub use signature::{Signature, SignatureAnalyzer, SignatureDb};
pub use threat_intel::ThreatIntelAnalyzer;

/// One detection layer
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    /// Which layer this is
    fn kind(&self) -> AnalyzerKind;

    /// Score the artifact
    async fn analyze(&self, artifact: &Artifact) -> AnalyzerResult;
}

/// Ordered set of analyzers; registry order is verdict order
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The six standard layers wired to the context's shared resources
    pub fn from_context(ctx: &ScanContext) -> Result<Self, ConfigError> {
        let lexical = if ctx.config.resolve_dns {
            LexicalAnalyzer::with_resolver(ctx.dns.clone())
        } else {
            LexicalAnalyzer::new()
        };

        Ok(Self::new()
            .with(lexical)
            .with(HeaderPolicyAnalyzer::new())
            .with(ThreatIntelAnalyzer::new(ctx.providers.clone()))
            .with(SignatureAnalyzer::new(ctx.signatures.clone()))
            .with(MlHeuristicAnalyzer::new())
            .with(BehavioralAnalyzer::new()?))
    }

    /// Add an analyzer, replacing any registered one of the same kind in place
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        let kind = analyzer.kind();
        match self.analyzers.iter_mut().find(|a| a.kind() == kind) {
            Some(slot) => *slot = analyzer,
            None => self.analyzers.push(analyzer),
        }
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<A: Analyzer + 'static>(mut self, analyzer: A) -> Self {
        self.register(Arc::new(analyzer));
        self
    }

    /// Analyzers in verdict order
    pub fn analyzers(&self) -> &[Arc<dyn Analyzer>] {
        &self.analyzers
    }

    /// Registered kinds in order
    pub fn kinds(&self) -> Vec<AnalyzerKind> {
        self.analyzers.iter().map(|a| a.kind()).collect()
    }

    /// Number of analyzers
    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    /// No analyzers registered
    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}

// =============================================================================
// Shared Heuristics
// =============================================================================

/// Words phishing URLs lean on
pub(crate) const PHISHING_KEYWORDS: &[&str] = &[
    "login", "signin", "sign-in", "verify", "verification", "account", "secure",
    "update", "confirm", "banking", "password", "credential", "wallet", "suspend",
    "unlock", "billing", "invoice", "webscr", "authenticate", "recovery",
];

/// Distinct phishing keywords present in `text`
pub(crate) fn keyword_hits(text: &str) -> Vec<&'static str> {
    let lower = text.to_ascii_lowercase();
    PHISHING_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| lower.contains(kw))
        .collect()
}

/// Shannon entropy in bits per character
pub(crate) fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let mut counts = std::collections::HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
        total += 1;
    }

    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

/// Edit distance between two strings
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Accumulates weighted findings into a capped score
#[derive(Debug, Default)]
pub(crate) struct Findings {
    score: f64,
    findings: Vec<String>,
}

impl Findings {
    pub(crate) fn add(&mut self, weight: f64, finding: impl Into<String>) {
        self.score += weight;
        self.findings.push(finding.into());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub(crate) fn into_result(self, kind: AnalyzerKind) -> AnalyzerResult {
        AnalyzerResult::completed(kind, self.score.min(100.0), self.findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(AnalyzerKind, f64);

    #[async_trait::async_trait]
    impl Analyzer for Fixed {
        fn kind(&self) -> AnalyzerKind {
            self.0
        }

        async fn analyze(&self, _artifact: &Artifact) -> AnalyzerResult {
            AnalyzerResult::completed(self.0, self.1, vec![])
        }
    }

    #[test]
    fn test_registry_replaces_same_kind_in_place() {
        let mut registry = AnalyzerRegistry::new()
            .with(Fixed(AnalyzerKind::StaticLexical, 1.0))
            .with(Fixed(AnalyzerKind::Behavioral, 2.0));
        registry.register(Arc::new(Fixed(AnalyzerKind::StaticLexical, 3.0)));

        assert_eq!(
            registry.kinds(),
            vec![AnalyzerKind::StaticLexical, AnalyzerKind::Behavioral]
        );
    }

    #[test]
    fn test_default_registry_has_all_layers_in_order() {
        let ctx = ScanContext::new(crate::ScanConfig::default()).unwrap();
        let registry = AnalyzerRegistry::from_context(&ctx).unwrap();
        assert_eq!(registry.kinds(), AnalyzerKind::ALL.to_vec());
    }

    #[test]
    fn test_entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("paypal.com", "paypa1.com"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_keyword_hits() {
        assert_eq!(keyword_hits("/Account/Verify?x=1"), vec!["verify", "account"]);
        assert!(keyword_hits("/docs/index.html").is_empty());
    }

    #[test]
    fn test_findings_cap() {
        let mut findings = Findings::default();
        findings.add(80.0, "a");
        findings.add(50.0, "b");
        let result = findings.into_result(AnalyzerKind::StaticLexical);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.findings.len(), 2);
    }
}
