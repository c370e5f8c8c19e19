//! Vote + Weighted-Risk Hybrid
//!
//! Alternative fusion policy: each layer that produced evidence casts a vote,
//! high-confidence sources count more, and the weighted risk backs the votes
//! up when they are split.

use std::time::Duration;

use crate::aggregation::{assemble, summarize, weighted_risk};
use crate::analyzers::threat_intel::KNOWN_BAD_TAG;
use crate::config::{AggregationPolicy, VotingConfig, WeightConfig};
use crate::{AggregateVerdict, AnalyzerResult, Classification};

/// Vote tally for one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Votes for malicious
    pub malicious: u32,
    /// Votes for suspicious
    pub suspicious: u32,
    /// Votes for safe
    pub safe: u32,
}

/// Vote-hybrid fusion policy
#[derive(Debug, Clone)]
pub struct VotingEngine {
    weights: WeightConfig,
    voting: VotingConfig,
}

impl VotingEngine {
    /// Engine over validated settings
    pub fn new(weights: WeightConfig, voting: VotingConfig) -> Self {
        Self { weights, voting }
    }

    /// How many votes one result is worth
    fn vote_weight(&self, result: &AnalyzerResult) -> u32 {
        if self.voting.high_confidence.contains(&result.kind) || result.has_tag(KNOWN_BAD_TAG) {
            self.voting.high_confidence_weight
        } else {
            1
        }
    }

    /// Count votes from completed results; errored and skipped layers abstain
    pub fn tally(&self, results: &[AnalyzerResult]) -> Tally {
        let mut tally = Tally::default();
        for result in results.iter().filter(|r| !r.is_failed() && !r.is_skipped()) {
            let weight = self.vote_weight(result);
            match Classification::from_risk(result.risk()) {
                Classification::Malicious => tally.malicious += weight,
                Classification::Suspicious => tally.suspicious += weight,
                Classification::Benign => tally.safe += weight,
            }
        }
        tally
    }

    /// Classification, weighted risk and the vote tally
    pub fn classify(&self, results: &[AnalyzerResult]) -> (Classification, f64, Tally) {
        let risk = weighted_risk(&self.weights, results);
        let tally = self.tally(results);

        let classification = if tally.malicious >= 2 || risk > 70.0 {
            Classification::Malicious
        } else if tally.malicious >= 1 || tally.suspicious > 0 || risk > 40.0 {
            Classification::Suspicious
        } else {
            Classification::Benign
        };
        (classification, risk, tally)
    }

    /// Fuse `results` into a verdict
    pub fn aggregate(
        &self,
        url: &str,
        results: &[AnalyzerResult],
        elapsed: Duration,
        cancelled: bool,
    ) -> AggregateVerdict {
        let (classification, risk, tally) = self.classify(results);
        let mut summary = summarize(results);
        summary.push(format!(
            "votes: {} malicious, {} suspicious, {} safe",
            tally.malicious, tally.suspicious, tally.safe
        ));

        assemble(
            url,
            classification,
            risk,
            results,
            summary,
            elapsed,
            cancelled,
            AggregationPolicy::VoteHybrid,
        )
    }
}
