//! Bounded retry with rate-limit awareness

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ApiError, Result};

/// Attempt budget and backoff curve for API calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A single attempt, no waiting
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Exponential delay before attempt `failed_attempt + 1`
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// How long to wait after `error` on attempt `failed_attempt`, or `None`
    /// if the error must not be retried.
    ///
    /// A server-provided `Retry-After` is honoured in full even when it exceeds
    /// `max_backoff`.
    pub fn delay_for(&self, error: &ApiError, failed_attempt: u32) -> Option<Duration> {
        match error {
            ApiError::RateLimited {
                retry_after: Some(wait),
            } => Some(*wait),
            ApiError::Unauthorized => Some(Duration::ZERO),
            e if e.is_retryable() => Some(self.backoff(failed_attempt)),
            _ => None,
        }
    }
}

/// Context handed to each attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: u32,
    /// The previous attempt was rejected with 401; refresh the token first
    pub refresh_token: bool,
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = Attempt {
        number: 1,
        refresh_token: false,
    };

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some(delay) = policy.delay_for(&error, attempt.number) else {
            debug!(operation, error = %error, "not retrying");
            return Err(error);
        };
        if attempt.number >= policy.max_attempts {
            warn!(operation, attempts = attempt.number, error = %error, "retries exhausted");
            return Err(error.exhausted());
        }

        warn!(
            operation,
            attempt = attempt.number,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        attempt = Attempt {
            number: attempt.number + 1,
            refresh_token: matches!(error, ApiError::Unauthorized),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }

    #[test]
    fn test_backoff_curve() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured() {
        let attempts: Mutex<Vec<Instant>> = Mutex::new(Vec::new());
        let started = Instant::now();

        let result = with_retry(&fast_policy(), "play", |attempt| {
            attempts.lock().unwrap().push(Instant::now());
            async move {
                if attempt.number == 1 {
                    Err(ApiError::RateLimited {
                        retry_after: Some(Duration::from_secs(7)),
                    })
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - started >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_header_uses_backoff() {
        let started = Instant::now();
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast_policy(), "devices", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::RateLimited { retry_after: None }) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s between the three attempts
        assert!(Instant::now() - started >= Duration::from_secs(3));
        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::TransientNetwork);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), "transfer", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::DeviceNotFound("abc".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ApiError::DeviceNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_requests_refresh_on_next_attempt() {
        let seen: Mutex<Vec<Attempt>> = Mutex::new(Vec::new());
        let result = with_retry(&fast_policy(), "volume", |attempt| {
            seen.lock().unwrap().push(attempt);
            async move {
                if attempt.number == 1 {
                    Err(ApiError::Unauthorized)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        let seen = seen.lock().unwrap();
        assert!(!seen[0].refresh_token);
        assert!(seen[1].refresh_token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), "play", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ApiError::Status {
                    status: 503,
                    message: "unavailable".into(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ApiError::Status { status: 503, .. })));
    }
}
