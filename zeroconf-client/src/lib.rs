//! Client for the local Spotify Connect zeroconf endpoint
//!
//! Receivers that advertise `_spotify-connect._tcp` expose a small HTTP
//! endpoint at `http://<ip>:<port><cpath>/`. Two actions matter for waking a
//! device and making it a valid playback target:
//!
//! - `getInfo` reports the device state and its names. Many receivers begin
//!   cloud registration as soon as they receive it.
//! - `addUser` hands the device credentials so it logs in to the account.
//!
//! Every call takes an explicit timeout; a failed call only fails that attempt.

mod error;
mod types;

pub use error::{Result, ZeroconfError};
pub use types::{
    normalize_cpath, AddUserCredentials, AuthMode, DeviceAddress, DeviceInfo, HealthReport,
    DEFAULT_CPATH,
};

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Ports tried by [`ZeroconfApi::probe`] after the advertised one
pub const PROBE_PORTS: [u16; 5] = [80, 8080, 4070, 4071, 4072];

/// Floor for a single port attempt while the probe budget lasts
const PROBE_MIN_PER_PORT: Duration = Duration::from_millis(200);

/// Local device wake/auth operations
#[async_trait]
pub trait ZeroconfApi: Send + Sync {
    /// Query device state; doubles as a wake-up nudge.
    async fn get_info(&self, address: &DeviceAddress, timeout: Duration) -> Result<DeviceInfo>;

    /// Register the account with the device.
    async fn add_user(
        &self,
        address: &DeviceAddress,
        credentials: &AddUserCredentials,
        mode: AuthMode,
        timeout: Duration,
    ) -> Result<()>;

    /// Best-effort reachability probe, finished within `timeout`. Never fails, only reports.
    async fn probe(&self, address: &DeviceAddress, timeout: Duration) -> bool;
}

/// HTTP implementation of [`ZeroconfApi`]
#[derive(Debug, Clone)]
pub struct ZeroconfClient {
    http: reqwest::Client,
}

impl ZeroconfClient {
    /// Create a client with default connection settings
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .pool_max_idle_per_host(1)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    /// Use a preconfigured `reqwest::Client`
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Check that the endpoint answers and how fast.
    pub async fn health(&self, address: &DeviceAddress, timeout: Duration) -> HealthReport {
        let started = tokio::time::Instant::now();
        let response = self
            .http
            .get(address.endpoint_url())
            .query(&[("action", "getInfo")])
            .timeout(timeout)
            .send()
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                HealthReport {
                    reachable: true,
                    responsive: status == 200,
                    status: Some(status),
                    response_time_ms: Some(elapsed_ms),
                    error: None,
                }
            }
            Err(err) => HealthReport {
                error: Some(ZeroconfError::from_reqwest(err, timeout).to_string()),
                ..Default::default()
            },
        }
    }

    async fn post_add_user(
        &self,
        address: &DeviceAddress,
        fields: &std::collections::BTreeMap<&'static str, String>,
        as_form: bool,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let request = self
            .http
            .post(address.endpoint_url())
            .query(&[("action", "addUser")])
            .timeout(timeout);
        let request = if as_form {
            request.form(fields)
        } else {
            request.json(fields)
        };
        request
            .send()
            .await
            .map_err(|e| ZeroconfError::from_reqwest(e, timeout))
    }
}

impl Default for ZeroconfClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ZeroconfApi for ZeroconfClient {
    async fn get_info(&self, address: &DeviceAddress, timeout: Duration) -> Result<DeviceInfo> {
        debug!(%address, "getInfo");
        let response = self
            .http
            .get(address.endpoint_url())
            .query(&[("action", "getInfo")])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ZeroconfError::from_reqwest(e, timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ZeroconfError::from_reqwest(e, timeout))?;

        if status != 200 {
            warn!(%address, status, "getInfo returned non-success status");
            return Err(ZeroconfError::Status { status, body });
        }

        let info: DeviceInfo =
            serde_json::from_str(&body).map_err(|e| ZeroconfError::Parse(e.to_string()))?;
        info!(%address, remote_name = ?info.remote_name, "device is awake and responding");
        Ok(info)
    }

    async fn add_user(
        &self,
        address: &DeviceAddress,
        credentials: &AddUserCredentials,
        mode: AuthMode,
        timeout: Duration,
    ) -> Result<()> {
        let fields = credentials.payload(mode)?;
        debug!(%address, %mode, "addUser");

        let mut response = self.post_add_user(address, &fields, false, timeout).await?;
        if response.status().as_u16() == 415 {
            debug!(%address, "device rejected JSON body, retrying form-encoded");
            response = self.post_add_user(address, &fields, true, timeout).await?;
        }

        let status = response.status().as_u16();
        if status == 200 {
            info!(%address, %mode, "addUser accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%address, status, "addUser rejected");
        Err(ZeroconfError::Status { status, body })
    }

    async fn probe(&self, address: &DeviceAddress, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if self.get_info(address, timeout / 2).await.is_ok() {
            return true;
        }

        let mut ports = vec![address.port];
        ports.extend(PROBE_PORTS.iter().copied().filter(|p| *p != address.port));
        let sweep = deadline.saturating_duration_since(Instant::now());
        let per_port = (sweep / ports.len() as u32).max(PROBE_MIN_PER_PORT);

        for port in ports {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(%address, "probe budget spent");
                break;
            }
            let url = address.root_url(port);
            match self.http.get(&url).timeout(per_port.min(remaining)).send().await {
                Ok(response) if matches!(response.status().as_u16(), 200 | 204 | 400 | 404) => {
                    debug!(%url, status = response.status().as_u16(), "probe answered");
                    return true;
                }
                Ok(response) => {
                    debug!(%url, status = response.status().as_u16(), "probe got unexpected status");
                }
                Err(err) => {
                    debug!(%url, error = %err, "probe failed");
                }
            }
        }

        false
    }
}
