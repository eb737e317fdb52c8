//! Web API response types

use serde::{Deserialize, Serialize};

/// A device as listed by `GET /me/player/devices`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDevice {
    /// Restricted devices may be listed without an id
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub volume_percent: Option<u8>,
}

impl CloudDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            device_type: "Speaker".to_string(),
            is_active: false,
            is_restricted: false,
            volume_percent: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceList {
    #[serde(default)]
    pub devices: Vec<CloudDevice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackContext {
    pub uri: String,
}

/// `GET /me/player` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    #[serde(default)]
    pub device: Option<CloudDevice>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub context: Option<PlaybackContext>,
    #[serde(default)]
    pub shuffle_state: bool,
}

impl PlaybackState {
    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref()?.id.as_deref()
    }

    /// Actively playing on the given device
    pub fn is_playing_on(&self, device_id: &str) -> bool {
        self.is_playing && self.device_id() == Some(device_id)
    }

    pub fn context_uri(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.uri.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistTotal {
    pub tracks: PlaylistTracks,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistTracks {
    pub total: u32,
}

/// Playlist id of a `spotify:playlist:<id>` URI
pub fn playlist_id(context_uri: &str) -> Option<&str> {
    context_uri
        .strip_prefix("spotify:playlist:")
        .filter(|id| !id.is_empty())
}
