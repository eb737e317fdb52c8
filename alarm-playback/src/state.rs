//! Device readiness states tracked during a run

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

/// How far a device has come towards being a playback target
///
/// Normal states form a strict progression; [`DeviceState::DeepSleepSuspected`]
/// is a side state entered when the device was seen locally but stopped
/// answering its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Unknown,
    Discovered,
    LocalAwake,
    LoggedIn,
    CloudVisible,
    Staged,
    Playing,
    DeepSleepSuspected,
}

impl DeviceState {
    fn rank(&self) -> Option<u8> {
        match self {
            DeviceState::Unknown => Some(0),
            DeviceState::Discovered => Some(1),
            DeviceState::LocalAwake => Some(2),
            DeviceState::LoggedIn => Some(3),
            DeviceState::CloudVisible => Some(4),
            DeviceState::Staged => Some(5),
            DeviceState::Playing => Some(6),
            DeviceState::DeepSleepSuspected => None,
        }
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: DeviceState) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => matches!(self, DeviceState::Discovered | DeviceState::LocalAwake),
            (None, Some(_)) => matches!(
                next,
                DeviceState::LocalAwake
                    | DeviceState::LoggedIn
                    | DeviceState::CloudVisible
                    | DeviceState::Staged
                    | DeviceState::Playing
            ),
            (None, None) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Discovered => "discovered",
            DeviceState::LocalAwake => "local_awake",
            DeviceState::LoggedIn => "logged_in",
            DeviceState::CloudVisible => "cloud_visible",
            DeviceState::Staged => "staged",
            DeviceState::Playing => "playing",
            DeviceState::DeepSleepSuspected => "deep_sleep_suspected",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub from: DeviceState,
    pub to: DeviceState,
    /// Milliseconds since the run started
    pub at_ms: u64,
}

/// Current state plus the transitions that led to it
#[derive(Debug)]
pub struct StateTracker {
    run_id: String,
    device: String,
    current: DeviceState,
    started: Instant,
    history: Vec<StateChange>,
}

impl StateTracker {
    pub fn new(run_id: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            device: device.into(),
            current: DeviceState::Unknown,
            started: Instant::now(),
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> DeviceState {
        self.current
    }

    /// Move to `next`; invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: DeviceState) -> bool {
        if next == self.current {
            return false;
        }
        if !self.current.can_transition_to(next) {
            warn!(
                run_id = %self.run_id,
                device = %self.device,
                from = %self.current,
                to = %next,
                "ignoring invalid state transition"
            );
            return false;
        }

        crate::logging::log_state_change(&self.run_id, &self.device, self.current, next);
        self.history.push(StateChange {
            from: self.current,
            to: next,
            at_ms: self.started.elapsed().as_millis() as u64,
        });
        self.current = next;
        true
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StateChange> {
        self.history
    }
}
