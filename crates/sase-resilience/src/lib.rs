//! OpenSASE Resilience Primitives
//!
//! Process-lifetime building blocks that shield expensive or quota-bound
//! external calls made by the security engines.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     RESILIENCE PRIMITIVES                      │
//! │                                                               │
//! │   caller ──► TtlCache hit? ──yes──► cached value               │
//! │                  │ no                                          │
//! │                  ▼                                             │
//! │            RateLimiter admits? ──no──► Limited { retry_after } │
//! │                  │ yes                                         │
//! │                  ▼                                             │
//! │            RetryPolicy::execute(external call)                 │
//! │              transient ─► 2^n backoff, 429 ─► Retry-After      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every public operation is atomic from the caller's perspective; the
//! structures are meant to be built once at startup and shared by `Arc`.

#![warn(missing_docs)]

pub mod cache;
pub mod ratelimit;
pub mod retry;

pub use cache::{CacheEntry, CacheStats, TtlCache};
pub use ratelimit::{RateDecision, RateLimiter, RateLimiterConfig};
pub use retry::{RetryPolicy, RetryableError};

use thiserror::Error;

/// Resilience configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResilienceError {
    /// Cache capacity must be non-zero
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,
    /// Rate limit must admit at least one request
    #[error("rate limit must be greater than zero")]
    ZeroLimit,
    /// Window must be a positive duration
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,
}

/// Result type for resilience primitives
pub type ResilienceResult<T> = Result<T, ResilienceError>;
