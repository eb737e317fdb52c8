//! Logging setup and structured run events
//!
//! Call [`init_logging`] (or [`init_logging_from_env`]) once at startup.
//! The `log_*` helpers emit the per-phase events every run produces, with
//! consistent field names so JSON output can be filtered by `run_id`.

use std::time::Duration;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::state::DeviceState;

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output
    Development,
    /// Verbose diagnostics with source locations
    Debug,
    /// One JSON object per line, for log shippers
    Json,
}

impl std::str::FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Ok(LoggingMode::Silent),
            "development" | "dev" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            "json" => Ok(LoggingMode::Json),
            other => Err(LoggingError::InvalidEnv(format!("unknown log mode '{}'", other))),
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Initialize logging with the specified mode
///
/// # Environment Variables
///
/// - `WAKEIFY_LOG_LEVEL`: filter directive (e.g. `info`, `alarm_playback=debug`)
/// - `RUST_LOG`: used when `WAKEIFY_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Json => {
            let filter = create_env_filter("info")?;
            Registry::default()
                .with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_current_span(false)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `WAKEIFY_LOG_MODE`
///
/// Accepts `silent`, `development`, `debug` or `json`; defaults to
/// development so unattended alarm runs leave a trail.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("WAKEIFY_LOG_MODE") {
        Ok(value) => value.parse()?,
        Err(_) => LoggingMode::Development,
    };
    init_logging(mode)
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directive = std::env::var("WAKEIFY_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directive)
        .map_err(|e| LoggingError::InvalidEnv(format!("bad filter '{}': {}", directive, e)))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

pub fn log_phase_start(run_id: &str, device: &str, phase: &str) {
    info!(run_id, device, phase, event = "phase_start", "phase started");
}

pub fn log_phase_end(run_id: &str, device: &str, phase: &str, elapsed: Duration, success: bool) {
    info!(
        run_id,
        device,
        phase,
        event = "phase_end",
        elapsed_ms = elapsed.as_millis() as u64,
        success,
        "phase finished"
    );
}

pub fn log_state_change(run_id: &str, device: &str, from: DeviceState, to: DeviceState) {
    info!(
        run_id,
        device,
        event = "state_change",
        from = %from,
        to = %to,
        "device state changed"
    );
}

/// Final summary line of a run
pub fn log_metrics(metrics: &crate::metrics::RunMetrics) {
    let errors = metrics.errors.len();
    info!(
        run_id = %metrics.run_id,
        device = %metrics.device,
        event = "run_complete",
        success = metrics.success,
        branch = %metrics.branch,
        final_state = %metrics.final_state,
        total_ms = metrics.total_duration_ms,
        poll_attempts = metrics.poll_attempts,
        fallback_attempts = metrics.fallback_attempts.len(),
        errors,
        "alarm run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("json".parse::<LoggingMode>().unwrap(), LoggingMode::Json);
        assert_eq!(" Debug ".parse::<LoggingMode>().unwrap(), LoggingMode::Debug);
        assert_eq!("dev".parse::<LoggingMode>().unwrap(), LoggingMode::Development);
        assert!("loud".parse::<LoggingMode>().is_err());
    }
}
