//! Fallback sequence run when the primary path did not end in playback
//!
//! Strategies run in a fixed order, each independent of the others, until
//! one yields the device's cloud id and playback is confirmed on it. The
//! last step always records the failure and produces manual recovery
//! instructions. Every strategy targets the configured device only.

use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};
use zeroconf_client::DeviceAddress;

use crate::config::FallbackStrategy;
use crate::metrics::{BreakerEvent, Branch, Phase, StrategyAttempt};
use crate::orchestrator::{Orchestrator, RunContext};
use crate::state::DeviceState;

/// Result of one strategy: the cloud id to play on, or why it failed
type StrategyOutcome = Result<String, String>;

impl Orchestrator {
    pub(crate) async fn run_fallback(&self, run: &mut RunContext<'_>) -> bool {
        let budget = self.timings.fallback_budget;
        let end = (Instant::now() + budget).min(run.hard_deadline + budget);
        let guard = run.metrics.begin_phase(Phase::Fallback);
        warn!(
            device = %run.profile.name,
            cause = run.failure_cause.as_deref().unwrap_or("unknown"),
            "primary path failed, starting fallback sequence"
        );

        let policy = run.profile.fallback_policy;
        let mut fresh_address: Option<DeviceAddress> = None;

        for strategy in FallbackStrategy::CONFIGURABLE {
            if !policy.enables(strategy) {
                continue;
            }
            if Instant::now() >= end {
                warn!(device = %run.profile.name, %strategy, "fallback budget exhausted");
                break;
            }

            let started = Instant::now();
            let outcome = match strategy {
                FallbackStrategy::QuickRecheck => self.quick_recheck(run, end).await,
                FallbackStrategy::IpWake => self.ip_wake(run, end).await,
                FallbackStrategy::DiscoveryWake => {
                    self.discovery_wake(run, end, &mut fresh_address).await
                }
                FallbackStrategy::Reauth => self.reauth(run, end, &mut fresh_address).await,
                FallbackStrategy::ForcedTransfer => self.forced_transfer(run),
                FallbackStrategy::TerminalFailure => Err("not a recovery strategy".to_string()),
            };

            let (success, detail) = match outcome {
                Ok(device_id) => {
                    let debounce = strategy != FallbackStrategy::ForcedTransfer;
                    match self.play_and_confirm(run, &device_id, end, debounce).await {
                        Ok(()) => (true, None),
                        Err(e) => (false, Some(format!("play failed: {}", e))),
                    }
                }
                Err(detail) => (false, Some(detail)),
            };

            info!(device = %run.profile.name, %strategy, success, detail = ?detail, "fallback strategy finished");
            run.metrics.fallback_attempts.push(StrategyAttempt {
                strategy,
                success,
                duration_ms: started.elapsed().as_millis() as u64,
                detail,
            });

            if success {
                run.metrics.branch = Branch::Fallback { strategy };
                self.record_success(run);
                run.metrics.end_phase(guard, true);
                return true;
            }
        }

        self.terminal_failure(run);
        run.metrics.end_phase(guard, false);
        false
    }

    /// 1. Maybe the device appeared right after polling gave up
    async fn quick_recheck(&self, run: &mut RunContext<'_>, end: Instant) -> StrategyOutcome {
        match self.find_cloud_device(run, end).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err("not in the cloud device list".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// 2. Probe every address we know for the device
    async fn ip_wake(&self, run: &mut RunContext<'_>, end: Instant) -> StrategyOutcome {
        let mut candidates: Vec<DeviceAddress> = Vec::new();
        let cached = self.cache.get_any(&run.profile.name).map(|r| r.address);
        for address in [run.address.clone(), run.profile.known_address(), cached]
            .into_iter()
            .flatten()
        {
            if !candidates.contains(&address) {
                candidates.push(address);
            }
        }
        if candidates.is_empty() {
            return Err("no known address".to_string());
        }

        for address in candidates {
            if Instant::now() >= end {
                break;
            }
            if self.probe(run, &address, end).await {
                run.address = Some(address);
                return self.brief_recheck(run, end).await;
            }
        }
        Err("no known address answered".to_string())
    }

    /// 3. Rediscover the device and probe the fresh address
    async fn discovery_wake(
        &self,
        run: &mut RunContext<'_>,
        end: Instant,
        fresh_address: &mut Option<DeviceAddress>,
    ) -> StrategyOutcome {
        self.cache.invalidate(&run.profile.name);
        let address = self.rediscover(run, end, fresh_address).await?;
        if !self.probe(run, &address, end).await {
            return Err(format!("discovered at {} but it did not answer", address));
        }
        self.brief_recheck(run, end).await
    }

    /// 4. addUser again against a freshly discovered address
    async fn reauth(
        &self,
        run: &mut RunContext<'_>,
        end: Instant,
        fresh_address: &mut Option<DeviceAddress>,
    ) -> StrategyOutcome {
        let address = match fresh_address.clone() {
            Some(address) => address,
            None => self.rediscover(run, end, fresh_address).await?,
        };
        if !self.register(run, &address, end, Phase::Fallback).await {
            return Err(format!("addUser at {} failed", address));
        }
        sleep_until((Instant::now() + self.timings.adduser_settle).min(end)).await;
        self.brief_recheck(run, end).await
    }

    /// 5. Transfer to the last known cloud id without waiting to see it listed
    fn forced_transfer(&self, run: &RunContext<'_>) -> StrategyOutcome {
        run.cloud_device_id
            .clone()
            .ok_or_else(|| "no known cloud device id".to_string())
    }

    /// 6. Give up: count the failure and tell the user how to recover
    fn terminal_failure(&self, run: &mut RunContext<'_>) {
        let profile = run.profile;
        let name = &profile.name;
        self.breaker.record_failure(&profile.key());
        run.metrics.breaker_event = Some(BreakerEvent::Failure);
        run.metrics.branch = Branch::Failed;

        let cause = run
            .failure_cause
            .as_deref()
            .unwrap_or("the device never became available");
        let diagnostic = format!(
            "Alarm playback on '{name}' failed ({cause}). To recover: make sure '{name}' is powered \
             on and on the same network, then open the Spotify app, select '{name}' as the playback \
             device and play a song once to re-authenticate it."
        );
        error!(
            run_id = %run.metrics.run_id,
            device = %name,
            event = "terminal_failure",
            diagnostic = %diagnostic,
            "all fallback strategies failed"
        );
        run.metrics.diagnostic = Some(diagnostic);
    }

    async fn rediscover(
        &self,
        run: &mut RunContext<'_>,
        end: Instant,
        fresh_address: &mut Option<DeviceAddress>,
    ) -> Result<DeviceAddress, String> {
        match self.discover(run, end).await {
            Ok(Some(found)) => {
                run.use_discovered(&found);
                *fresh_address = Some(found.address.clone());
                Ok(found.address)
            }
            Ok(None) => Err("not found on the local network".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn probe(&self, run: &mut RunContext<'_>, address: &DeviceAddress, end: Instant) -> bool {
        let until = (Instant::now() + self.timings.getinfo_timeout).min(end);
        let timeout = until.saturating_duration_since(Instant::now());
        let alive = match timeout_at(until, self.zeroconf.probe(address, timeout)).await {
            Ok(alive) => alive,
            Err(_) => {
                debug!(device = %run.profile.name, %address, "probe ran out of time");
                false
            }
        };
        if alive {
            run.reach(DeviceState::LocalAwake);
            run.last_wake_signal = Some(Instant::now());
        }
        alive
    }

    /// Short fast polling after a wake attempt
    async fn brief_recheck(&self, run: &mut RunContext<'_>, end: Instant) -> StrategyOutcome {
        let until = (Instant::now() + self.timings.fallback_recheck_window).min(end);
        let mut last_error = None;
        loop {
            match self.find_cloud_device(run, end).await {
                Ok(Some(id)) => return Ok(id),
                Ok(None) => {}
                Err(e) => last_error = Some(e.to_string()),
            }
            let now = Instant::now();
            if now >= until {
                break;
            }
            sleep_until((now + self.timings.poll_sleep_fast).min(until)).await;
        }
        Err(last_error.unwrap_or_else(|| "woke but not in the cloud device list".to_string()))
    }
}
