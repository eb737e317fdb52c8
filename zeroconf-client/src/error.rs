//! Error types for the zeroconf client

use thiserror::Error;

/// Errors that can occur while talking to a device's zeroconf endpoint
#[derive(Debug, Error)]
pub enum ZeroconfError {
    /// Connection refused, reset, DNS failure and similar
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete before its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The device answered with a non-success HTTP status
    #[error("Device returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The device answered but the body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Credentials are missing fields required by the selected auth mode
    #[error("Invalid credentials for {mode}: {reason}")]
    InvalidCredentials { mode: &'static str, reason: String },
}

impl ZeroconfError {
    /// Whether the failure is a plain reachability problem (device asleep or gone)
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ZeroconfError::Network(_) | ZeroconfError::Timeout(_))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: std::time::Duration) -> Self {
        if err.is_timeout() {
            ZeroconfError::Timeout(timeout)
        } else if err.is_decode() {
            ZeroconfError::Parse(err.to_string())
        } else {
            ZeroconfError::Network(err.to_string())
        }
    }
}

/// Convenience Result alias for zeroconf operations.
pub type Result<T> = std::result::Result<T, ZeroconfError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = ZeroconfError::Status {
            status: 415,
            body: "unsupported".to_string(),
        };
        assert_eq!(err.to_string(), "Device returned HTTP 415: unsupported");

        let err = ZeroconfError::InvalidCredentials {
            mode: "blob_client_key",
            reason: "missing blob".to_string(),
        };
        assert!(err.to_string().contains("blob_client_key"));
    }

    #[test]
    fn test_is_unreachable() {
        assert!(ZeroconfError::Network("refused".into()).is_unreachable());
        assert!(ZeroconfError::Timeout(Duration::from_millis(1500)).is_unreachable());
        assert!(!ZeroconfError::Parse("bad json".into()).is_unreachable());
        assert!(!ZeroconfError::Status {
            status: 500,
            body: String::new()
        }
        .is_unreachable());
    }
}
