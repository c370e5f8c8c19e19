//! Threat Intelligence Layer
//!
//! Reports a *reputation* (100 = clean). Providers are queried concurrently;
//! the lowest reputation among providers that answered wins.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use super::Analyzer;
use crate::error::AnalyzerError;
use crate::http::ExternalError;
use crate::intel::{ReputationProvider, ReputationReport};
use crate::{AnalyzerKind, AnalyzerResult, Artifact, FailureKind};

/// Tag set when any provider has the URL on record as malicious
pub const KNOWN_BAD_TAG: &str = "known_bad";

/// Reputation aggregation over external and local sources
pub struct ThreatIntelAnalyzer {
    providers: Vec<Arc<dyn ReputationProvider>>,
}

impl ThreatIntelAnalyzer {
    /// Layer over `providers`, queried concurrently
    pub fn new(providers: Vec<Arc<dyn ReputationProvider>>) -> Self {
        Self { providers }
    }

    /// Number of configured providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn combine(&self, reports: Vec<ReputationReport>, failures: Vec<(String, ExternalError)>) -> AnalyzerResult {
        let failure_notes: Vec<String> = failures.iter().map(|(name, e)| describe_failure(name, e)).collect();

        let Some(reputation) = reports.iter().map(|r| r.reputation).reduce(f64::min) else {
            let kind = failures
                .iter()
                .map(|(_, e)| e.failure_kind())
                .find(|k| *k == FailureKind::Authentication)
                .or_else(|| failures.first().map(|(_, e)| e.failure_kind()))
                .unwrap_or(FailureKind::Unavailable);
            let mut result = AnalyzerResult::error(self.kind(), kind, "no reputation provider answered");
            result.findings.extend(failure_notes);
            return result;
        };

        let known_bad = reports.iter().any(|r| r.known_bad);
        let findings = reports
            .iter()
            .flat_map(|r| r.findings.iter().map(move |f| format!("{}: {f}", r.provider)))
            .chain(failure_notes)
            .collect();
        let per_provider: serde_json::Map<String, serde_json::Value> = reports
            .iter()
            .map(|r| (r.provider.clone(), serde_json::json!(r.reputation)))
            .collect();

        let mut result = AnalyzerResult::completed(self.kind(), reputation, findings)
            .with_extra(serde_json::json!({ "providers": per_provider }));
        if known_bad {
            result = result.with_tags([KNOWN_BAD_TAG]);
        }
        result
    }
}

fn describe_failure(provider: &str, error: &ExternalError) -> String {
    match error {
        ExternalError::RateLimited { retry_after: Some(after) } => {
            format!("{provider}: rate limited, retry after {}s", after.as_secs())
        }
        ExternalError::Authentication(_) => format!("{provider}: credentials rejected"),
        other => format!("{provider}: unavailable ({other})"),
    }
}

#[async_trait::async_trait]
impl Analyzer for ThreatIntelAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::ThreatIntelligence
    }

    async fn analyze(&self, artifact: &Artifact) -> AnalyzerResult {
        if self.providers.is_empty() {
            return AnalyzerResult::skipped(self.kind(), "no reputation providers configured");
        }
        let start = Instant::now();

        let (url, host) = match (artifact.validate(), artifact.host()) {
            (Ok(url), Some(host)) => (url, host),
            _ => return AnalyzerResult::fault(self.kind(), AnalyzerError::Parse("URL cannot be looked up".into())),
        };

        let mut lookups = JoinSet::new();
        for provider in &self.providers {
            let provider = provider.clone();
            let url = url.clone();
            let host = host.clone();
            lookups.spawn(async move {
                let result = provider.lookup(&url, &host).await;
                (provider.name().to_string(), result)
            });
        }

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((name, Err(e))) => failures.push((name, e)),
                Err(e) => failures.push(("provider".to_string(), ExternalError::Connection(e.to_string()))),
            }
        }

        // Keep provider order stable regardless of completion order
        let order = |name: &str| self.providers.iter().position(|p| p.name() == name);
        reports.sort_by_key(|r| order(r.provider.as_str()));
        failures.sort_by_key(|(name, _)| order(name.as_str()));

        tracing::debug!(answered = reports.len(), failed = failures.len(), "reputation lookups finished");
        self.combine(reports, failures).with_duration(start.elapsed())
    }
}
