//! Data types exchanged with the zeroconf endpoint

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZeroconfError};

/// Connection path used by most Spotify Connect receivers
pub const DEFAULT_CPATH: &str = "/spotifyconnect/zeroconf";

/// Normalize a connection path: leading `/`, no trailing `/`, default when empty.
pub fn normalize_cpath(cpath: Option<&str>) -> String {
    let trimmed = cpath.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() || trimmed == "/" {
        return DEFAULT_CPATH.to_string();
    }

    let mut path = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// Where a device's zeroconf endpoint lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub cpath: String,
}

impl DeviceAddress {
    pub fn new(ip: IpAddr, port: u16, cpath: Option<&str>) -> Self {
        Self {
            ip,
            port,
            cpath: normalize_cpath(cpath),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Base URL of the endpoint; the `action` query parameter is appended per call
    pub fn endpoint_url(&self) -> String {
        format!("http://{}{}/", self.socket_addr(), self.cpath)
    }

    /// Same host on another port, root path; used for reachability probes
    pub fn root_url(&self, port: u16) -> String {
        format!("http://{}/", SocketAddr::new(self.ip, port))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.socket_addr(), self.cpath)
    }
}

/// Response body of `?action=getInfo`
///
/// Only the fields used for naming and diagnostics are typed; everything else
/// the firmware reports is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub remote_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "deviceID")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub active_user: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub brand_display_name: Option<String>,
    #[serde(default)]
    pub model_display_name: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl DeviceInfo {
    /// Name candidates in priority order: `remoteName`, then `displayName`.
    pub fn name_candidates(&self) -> Vec<String> {
        [&self.remote_name, &self.display_name]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether a user is already logged in on the device
    pub fn has_active_user(&self) -> bool {
        self.active_user
            .as_deref()
            .is_some_and(|user| !user.trim().is_empty())
    }
}

/// Credential encoding expected by the device firmware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    /// `tokenType=accesstoken` with a Web API access token
    #[default]
    #[serde(rename = "access_token")]
    AccessToken,
    /// Legacy blob + client key pair
    #[serde(rename = "blob_client_key", alias = "blob_clientKey")]
    BlobClientKey,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::AccessToken => "access_token",
            AuthMode::BlobClientKey => "blob_client_key",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthMode {
    type Err = ZeroconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "access_token" | "accesstoken" => Ok(AuthMode::AccessToken),
            "blob_client_key" | "blob_clientKey" | "blob" => Ok(AuthMode::BlobClientKey),
            other => Err(ZeroconfError::InvalidCredentials {
                mode: "unknown",
                reason: format!("unsupported auth mode '{}'", other),
            }),
        }
    }
}

/// Credentials handed to `addUser`
///
/// Which fields are required depends on the [`AuthMode`].
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AddUserCredentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for AddUserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddUserCredentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("user_name", &self.user_name)
            .field("blob", &self.blob.as_ref().map(|_| "<redacted>"))
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl AddUserCredentials {
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn blob(
        user_name: impl Into<String>,
        blob: impl Into<String>,
        client_key: impl Into<String>,
    ) -> Self {
        Self {
            user_name: Some(user_name.into()),
            blob: Some(blob.into()),
            client_key: Some(client_key.into()),
            token_type: Some("default".to_string()),
            ..Default::default()
        }
    }

    /// Build the request fields for the given mode.
    pub fn payload(&self, mode: AuthMode) -> Result<BTreeMap<&'static str, String>> {
        let mut fields = BTreeMap::new();
        match mode {
            AuthMode::AccessToken => {
                let token = required(&self.access_token, mode, "accessToken")?;
                fields.insert("tokenType", "accesstoken".to_string());
                fields.insert("accessToken", token);
            }
            AuthMode::BlobClientKey => {
                fields.insert("userName", required(&self.user_name, mode, "userName")?);
                fields.insert("blob", required(&self.blob, mode, "blob")?);
                fields.insert("clientKey", required(&self.client_key, mode, "clientKey")?);
                fields.insert(
                    "tokenType",
                    self.token_type
                        .clone()
                        .unwrap_or_else(|| "default".to_string()),
                );
            }
        }
        Ok(fields)
    }
}

fn required(value: &Option<String>, mode: AuthMode, field: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ZeroconfError::InvalidCredentials {
            mode: mode.as_str(),
            reason: format!("missing {}", field),
        })
}

/// Result of a device health check
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub reachable: bool,
    pub responsive: bool,
    pub status: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}
