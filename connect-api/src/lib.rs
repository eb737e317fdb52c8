//! Cloud playback control for Spotify Connect devices
//!
//! Wraps the four player operations an alarm needs (list devices, transfer
//! playback, set volume, start a context) plus playback state and pause,
//! behind the [`PlaybackApi`] trait. [`WebApiClient`] implements it over the
//! Spotify Web API with:
//!
//! - proactive and reactive token refresh ([`TokenManager`])
//! - `Retry-After` aware handling of 429 responses ([`RetryPolicy`])
//! - a per-request timeout on every call

mod client;
mod error;
mod retry;
mod token;
mod types;

pub use client::{WebApiClient, DEFAULT_API_BASE};
pub use error::{ApiError, ErrorKind, Result};
pub use retry::{with_retry, Attempt, RetryPolicy};
pub use token::{ClientCredentials, TokenManager, DEFAULT_REFRESH_MARGIN, DEFAULT_TOKEN_URL};
pub use types::{playlist_id, CloudDevice, PlaybackContext, PlaybackState};

use async_trait::async_trait;

/// Player operations used by the alarm orchestrator
#[async_trait]
pub trait PlaybackApi: Send + Sync {
    /// Devices currently registered with the account
    async fn list_devices(&self) -> Result<Vec<CloudDevice>>;

    /// Make `device_id` the active device, optionally resuming playback
    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()>;

    async fn set_volume(&self, device_id: &str, volume_percent: u8) -> Result<()>;

    /// Start a context (playlist, album, ...) on the device
    async fn start_context(&self, device_id: &str, context_uri: &str, shuffle: bool) -> Result<()>;

    /// `None` when nothing is playing anywhere
    async fn current_playback(&self) -> Result<Option<PlaybackState>>;

    async fn pause(&self, device_id: &str) -> Result<()>;

    /// A valid access token, refreshed if close to expiry
    async fn access_token(&self) -> Result<String>;

    /// Unconditionally refresh and return the new access token
    async fn refresh_token(&self) -> Result<String>;
}
