//! Alarm playback orchestration for Spotify Connect receivers
//!
//! Receivers sleep, take a variable time to wake, and register with the cloud
//! API some seconds after that. This crate runs the timeline that gets one
//! playing at a fixed time anyway:
//!
//! - [`Orchestrator`] sequences discovery, wake, authentication, cloud polling
//!   and playback against the alarm deadline
//! - a fallback sequence of independent recovery strategies runs when the
//!   primary path fails
//! - [`CircuitBreaker`] skips the primary path for devices that keep failing
//! - [`RunMetrics`] records what happened, phase by phase
//!
//! Collaborators (discovery, the device endpoint and the cloud API) are
//! injected as trait objects so tests can drive a run with fakes on a paused
//! tokio clock.

pub mod circuit_breaker;
pub mod config;
pub mod error;
mod fallback;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod state;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker};
pub use config::{
    validate_context_uri, AlarmConfig, Capabilities, DeviceProfile, FallbackPolicy,
    FallbackStrategy, Timings,
};
pub use error::{ConfigError, PlaybackError, Result};
pub use metrics::{BreakerEvent, Branch, Phase, ProfileUpdate, RunMetrics};
pub use orchestrator::{AlarmRequest, Orchestrator};
pub use state::DeviceState;
