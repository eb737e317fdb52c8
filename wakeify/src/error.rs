use alarm_playback::ConfigError;
use connect_api::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlarmError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("An alarm run is already in progress for {0}")]
    RunInProgress(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Profile store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, AlarmError>;
