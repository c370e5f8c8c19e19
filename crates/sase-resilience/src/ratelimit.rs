//! Sliding-window rate limiting
//!
//! Each external source gets its own limiter instance because providers
//! impose different quotas. Within a limiter, request timestamps are tracked
//! per key (usually the provider name or an API key).

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::{ResilienceError, ResilienceResult};

/// Limiter quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum admitted requests per window
    pub limit: u32,
    /// Rolling window length
    pub window: Duration,
}

impl RateLimiterConfig {
    /// Quota of `limit` requests per `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    fn validate(&self) -> ResilienceResult<()> {
        if self.limit == 0 {
            return Err(ResilienceError::ZeroLimit);
        }
        if self.window.is_zero() {
            return Err(ResilienceError::ZeroWindow);
        }
        Ok(())
    }
}

/// Admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request recorded
    Allowed {
        /// Slots left in the current window
        remaining: u32,
    },
    /// Request rejected, nothing recorded
    Limited {
        /// Time until the oldest request leaves the window
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the request was admitted
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Per-key sliding-window limiter
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter; fails on a zero limit or window
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            windows: DashMap::new(),
        })
    }

    /// Limiter name, used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured quota
    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Check-and-record: evict stale timestamps, then admit if under limit
    pub fn check(&self, source: &str) -> RateDecision {
        let now = Instant::now();
        let mut window = self.windows.entry(source.to_string()).or_insert_with(VecDeque::new);
        evict_stale(&mut window, now, self.config.window);

        if window.len() < self.config.limit as usize {
            window.push_back(now);
            RateDecision::Allowed {
                remaining: self.config.limit - window.len() as u32,
            }
        } else {
            let retry_after = retry_after_at(&window, now, self.config.window);
            tracing::debug!(
                limiter = %self.name,
                source,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit reached"
            );
            RateDecision::Limited { retry_after }
        }
    }

    /// Non-blocking admission check
    pub fn is_allowed(&self, source: &str) -> bool {
        self.check(source).is_allowed()
    }

    /// Wait until admitted or until `timeout` elapses
    pub async fn wait_if_needed(&self, source: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let retry_after = match self.check(source) {
                RateDecision::Allowed { .. } => return true,
                RateDecision::Limited { retry_after } => retry_after,
            };

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let pause = retry_after
                .max(Duration::from_millis(1))
                .min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    /// Time until the next request for `source` could be admitted
    pub fn retry_after(&self, source: &str) -> Duration {
        let now = Instant::now();
        match self.windows.get_mut(source) {
            Some(mut window) => {
                evict_stale(&mut window, now, self.config.window);
                if window.len() < self.config.limit as usize {
                    Duration::ZERO
                } else {
                    retry_after_at(&window, now, self.config.window)
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Slots left in the current window
    pub fn remaining(&self, source: &str) -> u32 {
        let now = Instant::now();
        match self.windows.get_mut(source) {
            Some(mut window) => {
                evict_stale(&mut window, now, self.config.window);
                self.config.limit.saturating_sub(window.len() as u32)
            }
            None => self.config.limit,
        }
    }

    /// Forget all history for `source`
    pub fn reset(&self, source: &str) {
        self.windows.remove(source);
    }
}

fn evict_stale(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
    while let Some(&oldest) = window.front() {
        if now.duration_since(oldest) >= length {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn retry_after_at(window: &VecDeque<Instant>, now: Instant, length: Duration) -> Duration {
    window
        .front()
        .map(|&oldest| (oldest + length).saturating_duration_since(now))
        .unwrap_or(Duration::ZERO)
}
