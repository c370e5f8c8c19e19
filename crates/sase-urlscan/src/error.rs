//! Error types for the URL scanner

use sase_resilience::ResilienceError;
use thiserror::Error;

use crate::FailureKind;

/// Artifact rejected before entering the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Empty or whitespace-only URL
    #[error("URL is empty")]
    EmptyUrl,

    /// URL longer than the accepted maximum
    #[error("URL is {len} characters long, maximum is {max}")]
    TooLong {
        /// Submitted length
        len: usize,
        /// Accepted maximum
        max: usize,
    },

    /// URL failed to parse
    #[error("malformed URL: {0}")]
    Malformed(String),

    /// Only http and https are analyzed
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// URL without a host component
    #[error("URL has no host")]
    MissingHost,
}

/// Invalid scanner configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Analyzer weights must sum to 1.0
    #[error("analyzer weights sum to {0}, expected 1.0")]
    WeightSum(f64),

    /// Weights must be non-negative and finite
    #[error("invalid weight {weight} for analyzer {analyzer}")]
    InvalidWeight {
        /// Analyzer name
        analyzer: String,
        /// Rejected value
        weight: f64,
    },

    /// Any other out-of-range setting
    #[error("invalid setting: {0}")]
    Invalid(String),

    /// Cache or limiter construction failed
    #[error("resilience error: {0}")]
    Resilience(#[from] ResilienceError),

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Signature rule failed to compile
    #[error("signature error: {0}")]
    Signature(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors visible to callers of the scanner
#[derive(Error, Debug)]
pub enum ScanError {
    /// Pre-flight validation failed
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Scanner could not be built
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Internal analyzer fault, always converted at the analyzer boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    /// Content could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

impl AnalyzerError {
    /// Failure class reported on the analyzer result
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Parse(_) => FailureKind::Internal,
        }
    }
}

/// Result type for scans
pub type ScanResult<T> = Result<T, ScanError>;
