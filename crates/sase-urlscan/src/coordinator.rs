//! Analyzer Fan-out
//!
//! One tokio task per analyzer. Every task races the same per-call budget;
//! whatever misses it is aborted and replaced by a neutral result, so a slow
//! or panicking layer can never take the verdict down with it.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::analyzers::Analyzer;
use crate::config::ScanConfig;
use crate::{AnalyzerKind, AnalyzerResult, Artifact, FailureKind};

/// Results of one fan-out, in registry order
#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    /// One result per analyzer
    pub results: Vec<AnalyzerResult>,
    /// Overall deadline hit before every analyzer finished
    pub cancelled: bool,
}

/// Runs analyzers concurrently under per-call and per-scan time budgets
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyCoordinator {
    per_call_timeout: Duration,
    overall_deadline: Option<Duration>,
}

impl ConcurrencyCoordinator {
    /// Coordinator with explicit budgets
    pub fn new(per_call_timeout: Duration, overall_deadline: Option<Duration>) -> Self {
        Self {
            per_call_timeout,
            overall_deadline,
        }
    }

    /// Budgets taken from the scan configuration
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.per_call_timeout(), config.scan_deadline())
    }

    /// Budget for a single analyzer
    pub fn per_call_timeout(&self) -> Duration {
        self.per_call_timeout
    }

    /// Run every analyzer against `artifact`
    ///
    /// Never fails: each slot of the outcome holds either the analyzer's own
    /// result or a substituted one (`Timeout`, `Panicked`, `Cancelled`).
    pub async fn run(&self, artifact: Arc<Artifact>, analyzers: &[Arc<dyn Analyzer>]) -> CoordinatorOutcome {
        let started = Instant::now();
        let call_deadline = started + self.per_call_timeout;
        let scan_deadline = self.overall_deadline.map(|d| started + d);

        let mut handles: Vec<(AnalyzerKind, JoinHandle<AnalyzerResult>)> = analyzers
            .iter()
            .map(|analyzer| {
                let analyzer = analyzer.clone();
                let artifact = artifact.clone();
                let kind = analyzer.kind();
                let handle = tokio::spawn(async move {
                    let start = Instant::now();
                    let result = analyzer.analyze(&artifact).await;
                    result.with_duration(start.elapsed())
                });
                (kind, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut cancelled = false;

        for (kind, handle) in handles.iter_mut() {
            let kind = *kind;

            // Tasks started together, so awaiting in order against absolute
            // deadlines bounds the whole fan-out by the per-call budget. Past
            // the deadline `timeout_at` still polls once, so tasks that
            // already finished keep their result.
            let (deadline, is_scan_deadline) = match scan_deadline {
                Some(scan) if scan <= call_deadline => (scan, true),
                _ => (call_deadline, false),
            };

            let result = match tokio::time::timeout_at(deadline, &mut *handle).await {
                Ok(Ok(result)) => {
                    tracing::debug!(
                        analyzer = %kind,
                        status = ?result.status,
                        score = result.score,
                        duration_ms = result.duration_ms,
                        "analyzer finished"
                    );
                    result
                }
                Ok(Err(e)) if e.is_panic() => {
                    tracing::warn!(analyzer = %kind, "analyzer panicked, substituting neutral score");
                    AnalyzerResult::error(kind, FailureKind::Panicked, "analyzer crashed")
                        .with_duration(started.elapsed())
                }
                Ok(Err(_)) => Self::cancelled(kind, started),
                Err(_) if is_scan_deadline => {
                    handle.abort();
                    if !cancelled {
                        tracing::warn!(analyzer = %kind, "scan deadline reached, cancelling outstanding analyzers");
                    }
                    cancelled = true;
                    Self::cancelled(kind, started)
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        analyzer = %kind,
                        timeout_ms = self.per_call_timeout.as_millis() as u64,
                        "analyzer timed out, substituting neutral score"
                    );
                    AnalyzerResult::error(
                        kind,
                        FailureKind::Timeout,
                        format!("timed out after {}ms", self.per_call_timeout.as_millis()),
                    )
                    .with_duration(self.per_call_timeout)
                }
            };
            results.push(result);
        }

        CoordinatorOutcome { results, cancelled }
    }

    fn cancelled(kind: AnalyzerKind, started: Instant) -> AnalyzerResult {
        AnalyzerResult::error(kind, FailureKind::Cancelled, "cancelled at scan deadline")
            .with_duration(started.elapsed())
    }
}
