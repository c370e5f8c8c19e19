//! Scanner Facade
//!
//! Entry point for callers: validate, queue behind the scan semaphore, fan
//! out to the analyzers, fuse, log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use sase_resilience::CacheStats;

use crate::aggregation::AggregationEngine;
use crate::analyzers::AnalyzerRegistry;
use crate::config::{AggregationPolicy, ScanConfig};
use crate::context::ScanContext;
use crate::coordinator::ConcurrencyCoordinator;
use crate::error::{ScanError, ScanResult};
use crate::voting::VotingEngine;
use crate::{AggregateVerdict, Artifact, Classification};

/// Scan counters
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Completed scans
    pub scans: AtomicU64,
    /// Artifacts rejected by validation
    pub rejected: AtomicU64,
    /// Degraded verdicts
    pub degraded: AtomicU64,
    /// Malicious verdicts
    pub malicious: AtomicU64,
    /// Suspicious verdicts
    pub suspicious: AtomicU64,
}

impl ScanStats {
    fn record(&self, verdict: &AggregateVerdict) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        if verdict.degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
        match verdict.classification {
            Classification::Malicious => {
                self.malicious.fetch_add(1, Ordering::Relaxed);
            }
            Classification::Suspicious => {
                self.suspicious.fetch_add(1, Ordering::Relaxed);
            }
            Classification::Benign => {}
        }
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            malicious: self.malicious.load(Ordering::Relaxed),
            suspicious: self.suspicious.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`ScanStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ScanStatsSnapshot {
    /// Completed scans
    pub scans: u64,
    /// Artifacts rejected by validation
    pub rejected: u64,
    /// Degraded verdicts
    pub degraded: u64,
    /// Malicious verdicts
    pub malicious: u64,
    /// Suspicious verdicts
    pub suspicious: u64,
}

/// URL risk scanner
pub struct UrlScanner {
    context: Arc<ScanContext>,
    registry: AnalyzerRegistry,
    coordinator: ConcurrencyCoordinator,
    weighted: AggregationEngine,
    voting: VotingEngine,
    permits: Arc<Semaphore>,
    stats: ScanStats,
}

impl UrlScanner {
    /// Build the shared context and the standard analyzer set
    pub fn new(config: ScanConfig) -> ScanResult<Self> {
        let context = ScanContext::new(config)?;
        let registry = AnalyzerRegistry::from_context(&context)?;
        Ok(Self::with_registry(context, registry))
    }

    /// Scanner over a caller-supplied analyzer set
    pub fn with_registry(context: ScanContext, registry: AnalyzerRegistry) -> Self {
        let config = &context.config;
        tracing::info!(
            analyzers = registry.len(),
            providers = context.providers.len(),
            policy = ?config.policy,
            max_concurrent_scans = config.max_concurrent_scans,
            "URL scanner initialized"
        );

        Self {
            coordinator: ConcurrencyCoordinator::from_config(config),
            weighted: AggregationEngine::new(config.weights),
            voting: VotingEngine::new(config.weights, config.voting.clone()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_scans)),
            stats: ScanStats::default(),
            registry,
            context: Arc::new(context),
        }
    }

    /// Shared resources
    pub fn context(&self) -> &ScanContext {
        &self.context
    }

    /// Analyzers in verdict order
    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    /// Active fusion policy
    pub fn policy(&self) -> AggregationPolicy {
        self.context.config.policy
    }

    /// Scan one artifact
    ///
    /// Only validation can fail; every other fault is folded into the
    /// verdict as a neutral score.
    pub async fn scan(&self, artifact: Artifact) -> ScanResult<AggregateVerdict> {
        if let Err(e) = artifact.validate() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "artifact rejected");
            return Err(ScanError::Validation(e));
        }

        // Closed only on drop, which cannot happen while `self` is borrowed
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ScanError::Config(crate::ConfigError::Invalid("scan semaphore closed".into())))?;

        let start = Instant::now();
        let artifact = Arc::new(artifact);
        let outcome = self
            .coordinator
            .run(artifact.clone(), self.registry.analyzers())
            .await;

        let verdict = match self.policy() {
            AggregationPolicy::WeightedOverride => {
                self.weighted
                    .aggregate(&artifact.url, &outcome.results, start.elapsed(), outcome.cancelled)
            }
            AggregationPolicy::VoteHybrid => {
                self.voting
                    .aggregate(&artifact.url, &outcome.results, start.elapsed(), outcome.cancelled)
            }
        };

        self.stats.record(&verdict);
        tracing::info!(
            scan_id = %verdict.scan_id,
            url = %verdict.url,
            classification = %verdict.classification,
            risk = verdict.overall_risk,
            degraded = verdict.degraded,
            duration_ms = (verdict.duration_seconds * 1000.0) as u64,
            "scan complete"
        );

        Ok(verdict)
    }

    /// Scan a bare URL
    pub async fn scan_url(&self, url: &str) -> ScanResult<AggregateVerdict> {
        self.scan(Artifact::new(url)).await
    }

    /// Scan a batch; results keep input order, concurrency stays bounded by
    /// `max_concurrent_scans`
    pub async fn scan_many(&self, artifacts: Vec<Artifact>) -> Vec<ScanResult<AggregateVerdict>> {
        futures_util::future::join_all(artifacts.into_iter().map(|artifact| self.scan(artifact))).await
    }

    /// Counter snapshot
    pub fn stats(&self) -> ScanStatsSnapshot {
        self.stats.snapshot()
    }

    /// Hit and miss counters per cache
    pub fn cache_stats(&self) -> BTreeMap<String, CacheStats> {
        self.context.caches.stats()
    }
}
