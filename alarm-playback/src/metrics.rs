//! Per-run result record

use std::fmt;

use chrono::{DateTime, Utc};
use connect_api::ErrorKind;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;
use zeroconf_client::DeviceAddress;

use crate::config::FallbackStrategy;
use crate::error::PlaybackError;
use crate::state::{DeviceState, StateChange};

/// Which path produced the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "branch", rename_all = "snake_case")]
pub enum Branch {
    /// Device was already in the cloud list at invocation
    FastPath,
    /// Discovery, wake and polling succeeded
    FullTimeline,
    /// A fallback strategy recovered the run
    Fallback { strategy: FallbackStrategy },
    Failed,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::FastPath => f.write_str("fast_path"),
            Branch::FullTimeline => f.write_str("full_timeline"),
            Branch::Fallback { strategy } => write!(f, "fallback-{}", strategy.ordinal()),
            Branch::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FastPath,
    Prewarm,
    GetInfo,
    AddUser,
    Polling,
    Play,
    Fallback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FastPath => "fast_path",
            Phase::Prewarm => "prewarm",
            Phase::GetInfo => "get_info",
            Phase::AddUser => "add_user",
            Phase::Polling => "polling",
            Phase::Play => "play",
            Phase::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    /// Milliseconds since the run started
    pub started_ms: u64,
    pub duration_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyAttempt {
    pub strategy: FallbackStrategy,
    pub success: bool,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

/// The single breaker update a run made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerEvent {
    Success,
    Failure,
}

/// Things a run learned about the device, to persist between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    /// Names the cloud list or getInfo reported for this device
    pub learned_names: Vec<String>,
    pub cloud_device_id: Option<String>,
    pub address: Option<DeviceAddress>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.learned_names.is_empty() && self.cloud_device_id.is_none() && self.address.is_none()
    }

    pub fn learn_name(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty()
            && !self
                .learned_names
                .iter()
                .any(|n| n.eq_ignore_ascii_case(name))
        {
            self.learned_names.push(name.to_string());
        }
    }
}

/// Everything a caller needs to log and persist about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub device: String,
    pub context_uri: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub branch: Branch,
    pub success: bool,
    pub final_state: DeviceState,
    pub state_history: Vec<StateChange>,
    pub phases: Vec<PhaseTiming>,
    pub errors: Vec<RunError>,
    pub fallback_attempts: Vec<StrategyAttempt>,
    /// The breaker was open and the primary path was skipped
    pub breaker_bypassed: bool,
    pub breaker_event: Option<BreakerEvent>,
    pub poll_attempts: u32,
    /// Manual recovery instructions when the run failed
    pub diagnostic: Option<String>,
    pub profile_update: ProfileUpdate,
    pub total_duration_ms: u64,
    #[serde(skip)]
    started: Instant,
}

impl RunMetrics {
    pub fn new(device: impl Into<String>, context_uri: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            device: device.into(),
            context_uri: context_uri.into(),
            started_at: Utc::now(),
            finished_at: None,
            branch: Branch::Failed,
            success: false,
            final_state: DeviceState::Unknown,
            state_history: Vec::new(),
            phases: Vec::new(),
            errors: Vec::new(),
            fallback_attempts: Vec::new(),
            breaker_bypassed: false,
            breaker_event: None,
            poll_attempts: 0,
            diagnostic: None,
            profile_update: ProfileUpdate::default(),
            total_duration_ms: 0,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Start timing a phase; finish it with [`RunMetrics::end_phase`].
    pub fn begin_phase(&self, phase: Phase) -> PhaseGuard {
        crate::logging::log_phase_start(&self.run_id.to_string(), &self.device, phase.as_str());
        PhaseGuard {
            phase,
            started: Instant::now(),
            started_ms: self.elapsed_ms(),
        }
    }

    pub fn end_phase(&mut self, guard: PhaseGuard, success: bool) {
        let elapsed = guard.started.elapsed();
        crate::logging::log_phase_end(
            &self.run_id.to_string(),
            &self.device,
            guard.phase.as_str(),
            elapsed,
            success,
        );
        self.phases.push(PhaseTiming {
            phase: guard.phase,
            started_ms: guard.started_ms,
            duration_ms: elapsed.as_millis() as u64,
            success,
        });
    }

    pub fn record_error(&mut self, phase: Phase, error: &PlaybackError) {
        self.errors.push(RunError {
            phase,
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseTiming> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub(crate) fn finish(&mut self, success: bool, final_state: DeviceState, history: Vec<StateChange>) {
        self.success = success;
        self.final_state = final_state;
        self.state_history = history;
        self.finished_at = Some(Utc::now());
        self.total_duration_ms = self.elapsed_ms();
        crate::logging::log_metrics(self);
    }
}

/// An open phase timer
#[derive(Debug)]
pub struct PhaseGuard {
    phase: Phase,
    started: Instant,
    started_ms: u64,
}
