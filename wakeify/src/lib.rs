//! Spotify Connect alarm playback
//!
//! Gets a sleeping Spotify Connect receiver playing a chosen playlist at an
//! exact time. Receivers sleep deeply, wake slowly and only reappear in the
//! cloud device list some seconds after that, so a plain "start playback"
//! call at alarm time usually fails. [`AlarmSystem`] runs a timed
//! wake/authenticate/poll/play sequence ahead of the deadline instead and
//! falls back through recovery strategies when that does not work.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       AlarmSystem                        │
//! │  profiles · in-flight runs · background upkeep · store   │
//! └───────────────┬──────────────────────────────────────────┘
//!                 │ run_alarm
//! ┌───────────────▼──────────────────────────────────────────┐
//! │            Orchestrator (wakeify-playback)               │
//! │  fast path → prewarm → getInfo → addUser → poll → play   │
//! │        └─ fallback strategies · circuit breaker          │
//! └──────┬──────────────────┬─────────────────────┬──────────┘
//!        │                  │                     │
//! ┌──────▼───────┐  ┌───────▼────────┐  ┌─────────▼─────────┐
//! │  discovery   │  │ zeroconf-client│  │    connect-api    │
//! │ mDNS + cache │  │ getInfo/addUser│  │  Spotify Web API  │
//! └──────────────┘  └────────────────┘  └───────────────────┘
//! ```
//!
//! Scheduling is the caller's business: a scheduler (cron, systemd timer,
//! the `wakeify` CLI) calls [`AlarmSystem::run_alarm`] with the deadline a
//! little ahead of time and the system takes it from there.

mod background;
mod error;
mod store;
mod system;

pub use background::{BackgroundIntervals, DISCOVERY_REFRESH_INTERVAL, PRESENCE_INTERVAL};
pub use error::{AlarmError, Result};
pub use store::{InMemoryProfileStore, ProfileStore};
pub use system::{AlarmSystem, AlarmSystemBuilder, DeviceStatus};

// Re-export the types callers need to configure and read a run
pub use alarm_playback::{
    logging, AlarmConfig, BreakerSnapshot, Branch, Capabilities, CircuitBreaker, ConfigError,
    DeviceProfile, DeviceState, FallbackPolicy, FallbackStrategy, Phase, ProfileUpdate,
    RunMetrics, Timings,
};
