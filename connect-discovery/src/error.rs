//! Error types for the discovery system.

use thiserror::Error;

/// Error type for discovery operations.
///
/// Not finding a device is not an error; `discover` reports it as `Ok(None)`.
/// Only failures to set up the multicast machinery surface here.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS daemon could not be started (sockets, threads)
    #[error("mDNS daemon unavailable: {0}")]
    Daemon(String),

    /// Browsing for the service type could not be started
    #[error("Failed to browse {service_type}: {reason}")]
    Browse {
        service_type: &'static str,
        reason: String,
    },
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::Daemon("too many open files".to_string());
        assert_eq!(err.to_string(), "mDNS daemon unavailable: too many open files");

        let err = DiscoveryError::Browse {
            service_type: "_spotify-connect._tcp.local.",
            reason: "closed".to_string(),
        };
        assert!(err.to_string().contains("_spotify-connect._tcp.local."));
    }
}
