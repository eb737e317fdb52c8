use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{CONTENT_LENGTH, RETRY_AFTER};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ApiError, Result};
use crate::retry::{with_retry, RetryPolicy};
use crate::token::TokenManager;
use crate::types::{playlist_id, CloudDevice, DeviceList, PlaybackState, PlaylistTotal};
use crate::PlaybackApi;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

/// A single Web API request, replayable across retry attempts
#[derive(Debug)]
struct ApiRequest {
    operation: &'static str,
    method: Method,
    path: String,
    query: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    fn new(operation: &'static str, method: Method, path: impl Into<String>) -> Self {
        Self {
            operation,
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug)]
struct ApiResponse {
    status: u16,
    body: String,
}

/// Spotify Web API client for the player endpoints
///
/// Every request carries its own timeout and goes through the shared
/// [`RetryPolicy`]: 429 waits for `Retry-After`, 401 refreshes the token,
/// 5xx and network errors back off, 404 is returned immediately.
#[derive(Debug, Clone)]
pub struct WebApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl WebApiClient {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_API_BASE.to_string(),
            tokens,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(3),
        }
    }

    /// Point the client at another API root (tests, proxies)
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ApiError::Configuration(format!("invalid base URL '{}': {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::Configuration(format!(
                "unsupported scheme '{}' in base URL",
                parsed.scheme()
            )));
        }
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request = &request;
        with_retry(&self.retry, request.operation, move |attempt| {
            self.send_once(request, attempt.refresh_token)
        })
        .await
    }

    async fn send_once(&self, request: &ApiRequest, force_refresh: bool) -> Result<ApiResponse> {
        let token = if force_refresh {
            self.tokens.refresh().await?
        } else {
            self.tokens.access_token().await?
        };

        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .bearer_auth(token)
            .timeout(self.call_timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            Some(body) => builder.json(body),
            None if request.method != Method::GET => builder.header(CONTENT_LENGTH, 0),
            None => builder,
        };

        debug!(operation = request.operation, %url, "web api request");
        let response = builder.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(ApiError::from_reqwest)?;

        match status {
            200..=299 => Ok(ApiResponse { status, body }),
            401 => {
                self.tokens.invalidate().await;
                Err(ApiError::Unauthorized)
            }
            404 => Err(ApiError::DeviceNotFound(api_message(&body))),
            429 => Err(ApiError::RateLimited { retry_after }),
            _ => Err(ApiError::Status {
                status,
                message: api_message(&body),
            }),
        }
    }

    /// Random start position inside a playlist, if it has more than one track
    async fn random_offset(&self, context_uri: &str) -> Option<u32> {
        let id = playlist_id(context_uri)?;
        let request = ApiRequest::new("playlist_total", Method::GET, format!("/playlists/{}", id))
            .query("fields", "tracks.total");
        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "could not read playlist size, starting from the top");
                return None;
            }
        };
        let total = serde_json::from_str::<PlaylistTotal>(&response.body)
            .ok()?
            .tracks
            .total;
        if total > 1 {
            Some(rand::rng().random_range(0..total))
        } else {
            None
        }
    }
}

#[async_trait]
impl PlaybackApi for WebApiClient {
    async fn list_devices(&self) -> Result<Vec<CloudDevice>> {
        let response = self
            .execute(ApiRequest::new("list_devices", Method::GET, "/me/player/devices"))
            .await?;
        let list: DeviceList =
            serde_json::from_str(&response.body).map_err(|e| ApiError::Parse(e.to_string()))?;
        debug!(count = list.devices.len(), "listed cloud devices");
        Ok(list.devices)
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()> {
        let request = ApiRequest::new("transfer_playback", Method::PUT, "/me/player")
            .body(json!({ "device_ids": [device_id], "play": play }));
        self.execute(request).await?;
        info!(device_id, play, "playback transferred");
        Ok(())
    }

    async fn set_volume(&self, device_id: &str, volume_percent: u8) -> Result<()> {
        let request = ApiRequest::new("set_volume", Method::PUT, "/me/player/volume")
            .query("volume_percent", volume_percent.min(100).to_string())
            .query("device_id", device_id);
        self.execute(request).await?;
        Ok(())
    }

    async fn start_context(&self, device_id: &str, context_uri: &str, shuffle: bool) -> Result<()> {
        let mut body = json!({ "context_uri": context_uri });
        if shuffle {
            if let Some(position) = self.random_offset(context_uri).await {
                body["offset"] = json!({ "position": position });
            }
        }

        let request = ApiRequest::new("start_context", Method::PUT, "/me/player/play")
            .query("device_id", device_id)
            .body(body);
        self.execute(request).await?;
        info!(device_id, context_uri, shuffle, "playback started");

        if shuffle {
            let request = ApiRequest::new("set_shuffle", Method::PUT, "/me/player/shuffle")
                .query("state", "true")
                .query("device_id", device_id);
            if let Err(e) = self.execute(request).await {
                warn!(device_id, error = %e, "could not enable shuffle");
            }
        }
        Ok(())
    }

    async fn current_playback(&self) -> Result<Option<PlaybackState>> {
        let response = self
            .execute(ApiRequest::new("current_playback", Method::GET, "/me/player"))
            .await?;
        if response.status == 204 || response.body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&response.body)
            .map(Some)
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn pause(&self, device_id: &str) -> Result<()> {
        let request = ApiRequest::new("pause", Method::PUT, "/me/player/pause").query("device_id", device_id);
        self.execute(request).await?;
        Ok(())
    }

    async fn access_token(&self) -> Result<String> {
        self.tokens.access_token().await
    }

    async fn refresh_token(&self) -> Result<String> {
        self.tokens.refresh().await
    }
}

/// `Retry-After` in (possibly fractional) seconds
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Pull `error.message` out of a Web API error body
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("3", Some(Duration::from_secs(3)))]
    #[case(" 0 ", Some(Duration::ZERO))]
    #[case("1.5", Some(Duration::from_millis(1500)))]
    #[case("-1", None)]
    #[case("1e300", None)]
    #[case("Wed, 21 Oct 2015 07:28:00 GMT", None)]
    fn test_parse_retry_after(#[case] value: &str, #[case] expected: Option<Duration>) {
        assert_eq!(parse_retry_after(value), expected);
    }

    #[test]
    fn test_api_message() {
        assert_eq!(
            api_message(r#"{"error":{"status":404,"message":"Device not found"}}"#),
            "Device not found"
        );
        assert_eq!(api_message(" plain "), "plain");
    }

    #[test]
    fn test_base_url_validation() {
        let tokens = Arc::new(TokenManager::new(Default::default()));
        assert!(WebApiClient::new(tokens.clone()).with_base_url("http://127.0.0.1:9/v1/").is_ok());
        assert!(WebApiClient::new(tokens.clone()).with_base_url("not a url").is_err());
        assert!(WebApiClient::new(tokens).with_base_url("ftp://example.com").is_err());
    }
}
