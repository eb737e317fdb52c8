//! Error types for the alarm-playback crate.

use std::path::PathBuf;

use connect_api::{ApiError, ErrorKind};
use connect_discovery::DiscoveryError;
use zeroconf_client::ZeroconfError;

/// Configuration problems; always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(String),

    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Errors raised inside a single orchestration phase.
///
/// These never escape a run; they are classified, recorded in the run
/// metrics and turned into "advance" or "fall back".
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Device endpoint error: {0}")]
    Zeroconf(#[from] ZeroconfError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The phase ran out of time
    #[error("{phase} timed out")]
    Timeout { phase: &'static str },

    /// The device is not visible where it needs to be
    #[error("Device absent: {0}")]
    DeviceAbsent(String),
}

impl PlaybackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::Api(e) => e.kind(),
            PlaybackError::Zeroconf(ZeroconfError::InvalidCredentials { .. }) => {
                ErrorKind::Configuration
            }
            PlaybackError::Zeroconf(ZeroconfError::Status { status, .. })
                if matches!(status, 401 | 403) =>
            {
                ErrorKind::Authentication
            }
            PlaybackError::Zeroconf(_) => ErrorKind::TransientNetwork,
            PlaybackError::Discovery(_) => ErrorKind::TransientNetwork,
            PlaybackError::Config(_) => ErrorKind::Configuration,
            PlaybackError::Timeout { .. } => ErrorKind::TransientNetwork,
            PlaybackError::DeviceAbsent(_) => ErrorKind::DeviceAbsent,
        }
    }

    pub fn is_device_absent(&self) -> bool {
        self.kind() == ErrorKind::DeviceAbsent
    }
}

/// Convenience type alias for phase results.
pub type Result<T> = std::result::Result<T, PlaybackError>;
