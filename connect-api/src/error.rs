use std::time::Duration;

use thiserror::Error;

/// Run-level classification of a failure
///
/// Phases use this to decide between "retry within budget", "advance to the
/// next phase" and "give up".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, refused connections, 5xx, exhausted rate limiting
    TransientNetwork,
    /// Token refresh exhausted or credentials rejected
    Authentication,
    /// 429 that may still be retried
    RateLimited,
    /// 404 or device missing from the device list
    DeviceAbsent,
    /// Missing or malformed configuration; never retried
    Configuration,
}

/// Errors from the cloud playback API
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not finish within its timeout
    #[error("Request timed out")]
    Timeout,

    /// 401 from a Web API endpoint; the access token is stale
    #[error("Access token rejected")]
    Unauthorized,

    /// The token could not be refreshed, or the refresh token was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// 429 with the server-provided wait, if any
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// 404: the device is not (or no longer) registered
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Any other non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Client misconfiguration (bad base URL, missing credentials)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_)
            | ApiError::Timeout
            | ApiError::Parse(_)
            | ApiError::Status { .. } => ErrorKind::TransientNetwork,
            ApiError::Unauthorized | ApiError::Authentication(_) => ErrorKind::Authentication,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::DeviceNotFound(_) => ErrorKind::DeviceAbsent,
            ApiError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_)
            | ApiError::Timeout
            | ApiError::Unauthorized
            | ApiError::RateLimited { .. } => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Convert the last error of an exhausted retry loop.
    ///
    /// Rate limiting that never cleared is reported as a transient network
    /// failure; a token that kept being rejected is an authentication failure.
    pub fn exhausted(self) -> Self {
        match self {
            ApiError::RateLimited { retry_after } => ApiError::Network(format!(
                "rate limit not cleared after retries (last retry-after {:?})",
                retry_after
            )),
            ApiError::Unauthorized => {
                ApiError::Authentication("access token rejected after refresh".to_string())
            }
            other => other,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Type alias for results that can return an ApiError
pub type Result<T> = std::result::Result<T, ApiError>;
