//! Access-token lifecycle
//!
//! Tokens are obtained with the refresh-token grant and cached until they are
//! within [`DEFAULT_REFRESH_MARGIN`] of expiry. A 401 from the Web API
//! invalidates the cached token so the next call refreshes.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::parse_retry_after;
use crate::error::{ApiError, Result};
use crate::retry::{with_retry, RetryPolicy};

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Refresh proactively when the token expires within this margin
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// OAuth client credentials plus the long-lived refresh token
#[derive(Clone, Deserialize, serde::Serialize, Default)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl ClientCredentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Names of the fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if self.client_secret.trim().is_empty() {
            missing.push("client_secret");
        }
        if self.refresh_token.trim().is_empty() {
            missing.push("refresh_token");
        }
        missing
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct TokenState {
    cached: Option<CachedToken>,
    refresh_token: String,
    refresh_count: u64,
}

/// Caches and refreshes the Web API access token
#[derive(Debug)]
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    margin: Duration,
    retry: RetryPolicy,
    request_timeout: Duration,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            margin: DEFAULT_REFRESH_MARGIN,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(5),
            state: Mutex::new(TokenState {
                cached: None,
                refresh_token: credentials.refresh_token,
                refresh_count: 0,
            }),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Return a token valid for at least the refresh margin, refreshing if needed.
    pub async fn access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(cached) = &state.cached {
            if cached.expires_at.saturating_duration_since(Instant::now()) > self.margin {
                return Ok(cached.access_token.clone());
            }
            debug!("access token near expiry, refreshing");
        }
        self.refresh_locked(&mut state).await
    }

    /// Force a refresh regardless of the cached token's age.
    pub async fn refresh(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Drop the cached token after the API rejected it.
    pub async fn invalidate(&self) {
        self.state.lock().await.cached = None;
    }

    /// How many successful refreshes have happened
    pub async fn refresh_count(&self) -> u64 {
        self.state.lock().await.refresh_count
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String> {
        let refresh_token = state.refresh_token.clone();
        let refresh_token = refresh_token.as_str();
        let response = with_retry(&self.retry, "token_refresh", move |_| {
            self.request_token(refresh_token)
        })
        .await
        .map_err(|e| match e {
            ApiError::Authentication(_) => e,
            other => ApiError::Authentication(format!("token refresh failed: {}", other)),
        })?;

        if let Some(rotated) = response.refresh_token.filter(|t| !t.is_empty()) {
            debug!("refresh token rotated");
            state.refresh_token = rotated;
        }
        state.cached = Some(CachedToken {
            access_token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        state.refresh_count += 1;
        info!(expires_in = response.expires_in, "access token refreshed");
        Ok(response.access_token)
    }

    async fn request_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = response.status().as_u16();
        match status {
            200 => response
                .json::<TokenResponse>()
                .await
                .map_err(|e| ApiError::Parse(e.to_string())),
            429 => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                warn!(status, ?retry_after, "token endpoint rate limited");
                Err(ApiError::RateLimited { retry_after })
            }
            400 | 401 | 403 => {
                let body = response.text().await.unwrap_or_default();
                warn!(status, "refresh token rejected");
                Err(ApiError::Authentication(format!("HTTP {}: {}", status, body)))
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(ApiError::Status { status, message })
            }
        }
    }
}
