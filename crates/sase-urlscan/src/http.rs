//! HTTP plumbing for external reputation sources
//!
//! Maps transport failures and status codes onto [`ExternalError`], the
//! classification [`RetryPolicy`](sase_resilience::RetryPolicy) works from.

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use sase_resilience::RetryableError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::error::ConfigError;
use crate::FailureKind;

const USER_AGENT: &str = concat!("opensase-urlscan/", env!("CARGO_PKG_VERSION"));

/// Failure of one external call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    /// Connect or read timeout, or a gateway timeout
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Credentials rejected (401/403)
    #[error("authentication rejected with status {0}")]
    Authentication(u16),

    /// Quota exceeded (429), local or remote
    #[error("rate limited")]
    RateLimited {
        /// Provider hint or local limiter wait
        retry_after: Option<Duration>,
    },

    /// Provider-side failure (5xx)
    #[error("server error {0}")]
    Server(u16),

    /// Any other non-success status
    #[error("unexpected status {0}")]
    Http(u16),

    /// 2xx body that is not the expected JSON
    #[error("invalid response body: {0}")]
    Parse(String),
}

impl ExternalError {
    /// Failure kind recorded on the analyzer result
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Authentication(_) => FailureKind::Authentication,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            _ => FailureKind::Unavailable,
        }
    }

    /// Provider answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http(404))
    }
}

impl RetryableError for ExternalError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_) | Self::Server(_))
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ExternalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            classify_status(status, None).unwrap_or(Self::Http(status.as_u16()))
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// Map a status to an error; `None` for success codes
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> Option<ExternalError> {
    if status.is_success() {
        return None;
    }

    let code = status.as_u16();
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExternalError::Authentication(code),
        StatusCode::TOO_MANY_REQUESTS => ExternalError::RateLimited { retry_after },
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => ExternalError::Timeout,
        s if s.is_server_error() => ExternalError::Server(code),
        _ => ExternalError::Http(code),
    })
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Client with distinct connect and read timeouts; TLS verification stays on
pub fn build_client(connect_timeout: Duration, read_timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Send a request and decode a JSON body
pub async fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ExternalError> {
    let resp = request.send().await?;

    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    if let Some(error) = classify_status(resp.status(), retry_after) {
        return Err(error);
    }

    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| ExternalError::Parse(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify_status(StatusCode::OK, None), None);
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, None),
            Some(ExternalError::Authentication(401))
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, None),
            Some(ExternalError::Authentication(403))
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(5))),
            Some(ExternalError::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            })
        );
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT, None), Some(ExternalError::Timeout));
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None),
            Some(ExternalError::Server(503))
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND, None), Some(ExternalError::Http(404)));
    }

    #[test]
    fn test_retry_classification() {
        assert!(ExternalError::Timeout.is_transient());
        assert!(ExternalError::Server(502).is_transient());
        assert!(ExternalError::Connection("refused".into()).is_transient());
        assert!(!ExternalError::Authentication(401).is_transient());
        assert!(!ExternalError::Http(400).is_transient());
        assert!(!ExternalError::Parse("html".into()).is_transient());

        let limited = ExternalError::RateLimited {
            retry_after: Some(Duration::from_secs(9)),
        };
        assert!(limited.is_rate_limited());
        assert_eq!(RetryableError::retry_after(&limited), Some(Duration::from_secs(9)));
        assert_eq!(limited.failure_kind(), FailureKind::RateLimited);
        assert_eq!(
            ExternalError::Authentication(403).failure_kind(),
            FailureKind::Authentication
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon"), None);

        let future = (chrono::Utc::now() + chrono::Duration::seconds(90)).to_rfc2822();
        let parsed = parse_retry_after(&future).unwrap();
        assert!(parsed > Duration::from_secs(80) && parsed <= Duration::from_secs(90));
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(Duration::from_secs(1), Duration::from_secs(2)).is_ok());
    }
}
