//! Per-device gate for the primary wake path
//!
//! ```text
//! CLOSED ──[3rd failure]──► OPEN ──[next query 300s after last failure]──► CLOSED
//!    ▲                        │
//!    └──────[success]─────────┘
//! ```
//!
//! The reset is evaluated lazily when [`CircuitBreaker::should_bypass_primary`]
//! is called; no timer runs in the background.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct BreakerEntry {
    failures: u32,
    open: bool,
    last_failure: Instant,
}

/// Point-in-time view of one device's breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub device: String,
    pub failures: u32,
    pub open: bool,
    /// Seconds since the last recorded failure
    pub since_last_failure_s: u64,
}

/// Failure counters keyed by device
///
/// Shared between concurrent runs; each device entry is updated under its
/// own shard lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    entries: DashMap<String, BreakerEntry>,
    threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_AFTER)
    }

    pub fn with_settings(threshold: u32, reset_after: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            threshold: threshold.max(1),
            reset_after,
        }
    }

    /// `true` while the breaker for `device` is open
    pub fn should_bypass_primary(&self, device: &str) -> bool {
        let Some(mut entry) = self.entries.get_mut(&key(device)) else {
            return false;
        };
        if !entry.open {
            return false;
        }
        if entry.last_failure.elapsed() >= self.reset_after {
            info!(device, "circuit breaker reset after cool-down");
            entry.open = false;
            entry.failures = 0;
            return false;
        }
        true
    }

    pub fn record_failure(&self, device: &str) {
        let now = Instant::now();
        let mut entry = self.entries.entry(key(device)).or_insert(BreakerEntry {
            failures: 0,
            open: false,
            last_failure: now,
        });
        entry.failures = entry.failures.saturating_add(1);
        entry.last_failure = now;
        if !entry.open && entry.failures >= self.threshold {
            entry.open = true;
            warn!(device, failures = entry.failures, "circuit breaker opened, primary path disabled");
        }
    }

    pub fn record_success(&self, device: &str) {
        if let Some(mut entry) = self.entries.get_mut(&key(device)) {
            if entry.open {
                info!(device, "circuit breaker closed by successful run");
            }
            entry.open = false;
            entry.failures = 0;
        }
    }

    /// Forget everything about `device`
    pub fn reset(&self, device: &str) -> bool {
        self.entries.remove(&key(device)).is_some()
    }

    pub fn failures(&self, device: &str) -> u32 {
        self.entries.get(&key(device)).map(|e| e.failures).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshot: Vec<BreakerSnapshot> = self
            .entries
            .iter()
            .map(|entry| BreakerSnapshot {
                device: entry.key().clone(),
                failures: entry.failures,
                open: entry.open,
                since_last_failure_s: entry.last_failure.elapsed().as_secs(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.device.cmp(&b.device));
        snapshot
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

fn key(device: &str) -> String {
    device.trim().to_lowercase()
}
