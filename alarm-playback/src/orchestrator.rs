//! Timeline orchestrator
//!
//! One [`Orchestrator::run_alarm`] call drives a device from "unknown" to
//! "playing" against a fixed deadline:
//!
//! ```text
//! invocation ── fast path? ──────────────────────────────► play + confirm
//!      │
//!      ├─ T−60 prewarm (discovery)
//!      ├─ T−30 getInfo
//!      ├─ T−10 addUser (+ settle)
//!      ├─ cloud polling (until seen or window end)
//!      └─ T−0 play + confirm ── not confirmed ──► fallback sequence
//! ```
//!
//! Every network call carries an explicit timeout, and nothing on the
//! primary path runs past the hard deadline (`deadline + failover_threshold`).

use std::future::Future;
use std::sync::Arc;

use connect_api::{CloudDevice, PlaybackApi};
use connect_discovery::{DeviceDiscovery, DiscoveryCache, DiscoveryResult, MatchKind};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};
use zeroconf_client::{AddUserCredentials, AuthMode, DeviceAddress, ZeroconfApi};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{DeviceProfile, Timings};
use crate::error::{ConfigError, PlaybackError};
use crate::metrics::{BreakerEvent, Branch, Phase, RunMetrics};
use crate::state::{DeviceState, StateTracker};

/// What to play and when
#[derive(Debug, Clone)]
pub struct AlarmRequest {
    pub context_uri: String,
    pub shuffle: bool,
    /// Alarm fire time
    pub deadline: Instant,
}

impl AlarmRequest {
    pub fn new(context_uri: impl Into<String>, deadline: Instant) -> Self {
        Self {
            context_uri: context_uri.into(),
            shuffle: false,
            deadline,
        }
    }

    /// Fire immediately
    pub fn now(context_uri: impl Into<String>) -> Self {
        Self::new(context_uri, Instant::now())
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

/// Mutable state of a single run
pub(crate) struct RunContext<'a> {
    pub profile: &'a DeviceProfile,
    pub context_uri: String,
    pub shuffle: bool,
    pub effective_deadline: Instant,
    pub hard_deadline: Instant,
    pub metrics: RunMetrics,
    pub tracker: StateTracker,
    /// Zeroconf endpoint in use for this run
    pub address: Option<DeviceAddress>,
    /// Cloud id the device was last listed under
    pub cloud_device_id: Option<String>,
    /// Last successful getInfo/addUser/probe
    pub last_wake_signal: Option<Instant>,
    pub add_user_ok: bool,
    /// First thing that went wrong, for the terminal diagnostic
    pub failure_cause: Option<String>,
}

impl<'a> RunContext<'a> {
    fn new(profile: &'a DeviceProfile, request: AlarmRequest, timings: &Timings) -> Self {
        let effective_deadline = request.deadline.max(Instant::now());
        let metrics = RunMetrics::new(profile.name.clone(), request.context_uri.clone());
        let tracker = StateTracker::new(metrics.run_id.to_string(), profile.name.clone());
        Self {
            profile,
            context_uri: request.context_uri,
            shuffle: request.shuffle,
            effective_deadline,
            hard_deadline: effective_deadline + timings.failover_threshold,
            metrics,
            tracker,
            address: None,
            cloud_device_id: profile.cloud_device_id.clone(),
            last_wake_signal: None,
            add_user_ok: false,
            failure_cause: None,
        }
    }

    /// Advance if the transition is valid from the current state
    pub fn reach(&mut self, state: DeviceState) {
        if self.tracker.current().can_transition_to(state) {
            self.tracker.advance(state);
        }
    }

    pub fn note_error(&mut self, phase: Phase, error: &PlaybackError) {
        warn!(device = %self.profile.name, %phase, error = %error, "phase error");
        self.metrics.record_error(phase, error);
        if self.failure_cause.is_none() {
            self.failure_cause = Some(format!("{}: {}", phase, error));
        }
    }

    pub fn use_address(&mut self, address: DeviceAddress, discovered: bool) {
        if discovered {
            self.reach(DeviceState::Discovered);
        }
        self.address = Some(address);
    }

    /// Use a discovery result; only an exact name match is learned.
    pub fn use_discovered(&mut self, result: &DiscoveryResult) {
        let exact = self
            .profile
            .all_names()
            .into_iter()
            .any(|name| result.matches(name) == Some(MatchKind::Exact));
        if exact && self.profile.known_address().as_ref() != Some(&result.address) {
            self.metrics.profile_update.address = Some(result.address.clone());
        } else if !exact {
            debug!(
                device = %self.profile.name,
                found = result.primary_name(),
                "partial name match, address not learned"
            );
        }
        self.use_address(result.address.clone(), true);
    }

    fn note_cloud_device(&mut self, device: &CloudDevice) {
        self.metrics.profile_update.learn_name(&device.name);
        if let Some(id) = &device.id {
            if self.profile.cloud_device_id.as_ref() != Some(id) {
                self.metrics.profile_update.cloud_device_id = Some(id.clone());
            }
            self.cloud_device_id = Some(id.clone());
        }
    }

    fn matches_device(&self, device: &CloudDevice) -> bool {
        let name = device.name.trim();
        self.profile.matches_cloud_device(device)
            || self
                .metrics
                .profile_update
                .learned_names
                .iter()
                .any(|learned| learned.eq_ignore_ascii_case(name))
    }

    fn into_metrics(self, success: bool) -> RunMetrics {
        let mut metrics = self.metrics;
        let final_state = self.tracker.current();
        metrics.finish(success, final_state, self.tracker.into_history());
        metrics
    }
}

enum Visibility {
    Absent,
    Visible(String),
    AlreadyPlaying,
}

/// Runs alarms against injected collaborators
///
/// The breaker and the discovery cache are shared with every other run in
/// the process; everything else about a run lives on its own stack.
pub struct Orchestrator {
    pub(crate) discovery: Arc<dyn DeviceDiscovery>,
    pub(crate) zeroconf: Arc<dyn ZeroconfApi>,
    pub(crate) api: Arc<dyn PlaybackApi>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) cache: DiscoveryCache,
    pub(crate) timings: Timings,
    pub(crate) prewarm_enabled: bool,
    pub(crate) blob_credentials: Option<AddUserCredentials>,
}

impl Orchestrator {
    pub fn new(
        discovery: Arc<dyn DeviceDiscovery>,
        zeroconf: Arc<dyn ZeroconfApi>,
        api: Arc<dyn PlaybackApi>,
        breaker: Arc<CircuitBreaker>,
        cache: DiscoveryCache,
    ) -> Self {
        Self {
            discovery,
            zeroconf,
            api,
            breaker,
            cache,
            timings: Timings::default(),
            prewarm_enabled: true,
            blob_credentials: None,
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_prewarm(mut self, enabled: bool) -> Self {
        self.prewarm_enabled = enabled;
        self
    }

    pub fn with_blob_credentials(mut self, credentials: Option<AddUserCredentials>) -> Self {
        self.blob_credentials = credentials;
        self
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run one alarm to completion.
    ///
    /// Never fails: the outcome, per-phase timings and errors are all in
    /// the returned [`RunMetrics`].
    pub async fn run_alarm(&self, profile: &DeviceProfile, request: AlarmRequest) -> RunMetrics {
        let mut run = RunContext::new(profile, request, &self.timings);
        info!(
            run_id = %run.metrics.run_id,
            device = %profile.name,
            context_uri = %run.context_uri,
            seconds_to_deadline = run
                .effective_deadline
                .saturating_duration_since(Instant::now())
                .as_secs_f64(),
            "alarm run started"
        );

        let success = self.execute(&mut run).await;
        run.into_metrics(success)
    }

    async fn execute(&self, run: &mut RunContext<'_>) -> bool {
        match self.fast_path(run).await {
            Visibility::AlreadyPlaying => {
                info!(device = %run.profile.name, "already playing the requested context");
                return self.primary_succeeded(run, Branch::FastPath);
            }
            Visibility::Visible(device_id) => {
                info!(device = %run.profile.name, "device already visible, taking fast path");
                let limit = run.hard_deadline;
                return match self.play_and_confirm(run, &device_id, limit, false).await {
                    Ok(()) => self.primary_succeeded(run, Branch::FastPath),
                    Err(_) => self.run_fallback(run).await,
                };
            }
            Visibility::Absent => {}
        }

        if self.breaker.should_bypass_primary(&run.profile.key()) {
            warn!(device = %run.profile.name, "circuit breaker open, skipping primary path");
            run.metrics.breaker_bypassed = true;
            run.failure_cause
                .get_or_insert_with(|| "circuit breaker open after repeated failures".to_string());
            if run.effective_deadline > Instant::now() {
                sleep_until(run.effective_deadline).await;
            }
            return self.run_fallback(run).await;
        }

        let Some(device_id) = self.primary_path(run).await else {
            return self.run_fallback(run).await;
        };

        let limit = run.hard_deadline;
        match self.play_and_confirm(run, &device_id, limit, true).await {
            Ok(()) => self.primary_succeeded(run, Branch::FullTimeline),
            Err(_) => self.run_fallback(run).await,
        }
    }

    fn primary_succeeded(&self, run: &mut RunContext<'_>, branch: Branch) -> bool {
        run.metrics.branch = branch;
        self.record_success(run);
        true
    }

    pub(crate) fn record_success(&self, run: &mut RunContext<'_>) {
        self.breaker.record_success(&run.profile.key());
        run.metrics.breaker_event = Some(BreakerEvent::Success);
    }

    async fn fast_path(&self, run: &mut RunContext<'_>) -> Visibility {
        let guard = run.metrics.begin_phase(Phase::FastPath);
        let limit = run.hard_deadline;

        let device_id = match self.find_cloud_device(run, limit).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                run.metrics.end_phase(guard, false);
                return Visibility::Absent;
            }
            Err(e) => {
                run.note_error(Phase::FastPath, &e);
                run.metrics.end_phase(guard, false);
                return Visibility::Absent;
            }
        };

        let playback = self
            .bounded("current_playback", self.call_limit(limit), self.api.current_playback())
            .await;
        run.metrics.end_phase(guard, true);

        match playback {
            Ok(Some(state))
                if state.is_playing_on(&device_id)
                    && state.context_uri() == Some(run.context_uri.as_str()) =>
            {
                run.reach(DeviceState::Playing);
                Visibility::AlreadyPlaying
            }
            _ => Visibility::Visible(device_id),
        }
    }

    /// Prewarm, getInfo, addUser, polling. Returns the cloud id once listed.
    async fn primary_path(&self, run: &mut RunContext<'_>) -> Option<String> {
        let capabilities = run.profile.capabilities;

        if capabilities.prewarm && self.prewarm_enabled {
            self.wait_for_offset(run, self.timings.prewarm_offset).await;
            let guard = run.metrics.begin_phase(Phase::Prewarm);
            let found = self.resolve_address(run, Phase::Prewarm).await;
            run.metrics.end_phase(guard, found);
        }

        if capabilities.local_wake {
            self.wait_for_offset(run, self.timings.getinfo_offset).await;
            let info_ok = self.get_info_phase(run).await;

            self.wait_for_offset(run, self.timings.adduser_offset).await;
            let add_ok = self.add_user_phase(run).await;

            if !info_ok
                && !add_ok
                && matches!(
                    run.tracker.current(),
                    DeviceState::Discovered | DeviceState::LocalAwake
                )
            {
                warn!(device = %run.profile.name, "device seen on the network but not answering, suspecting deep sleep");
                run.tracker.advance(DeviceState::DeepSleepSuspected);
            }
        }

        self.poll_phase(run).await
    }

    async fn wait_for_offset(&self, run: &RunContext<'_>, offset: std::time::Duration) {
        if let Some(at) = run.effective_deadline.checked_sub(offset) {
            if at > Instant::now() {
                sleep_until(at).await;
            }
        }
    }

    /// Fresh cache entry, then discovery, then the configured address.
    pub(crate) async fn resolve_address(&self, run: &mut RunContext<'_>, phase: Phase) -> bool {
        if run.address.is_some() {
            return true;
        }

        if let Some(cached) = self.cache.get_fresh(&run.profile.name) {
            debug!(device = %run.profile.name, address = %cached.address, "using cached discovery result");
            run.use_discovered(&cached);
            return true;
        }

        let limit = run.hard_deadline;
        match self.discover(run, limit).await {
            Ok(Some(found)) => {
                run.use_discovered(&found);
                return true;
            }
            Ok(None) => debug!(device = %run.profile.name, "not found by discovery"),
            Err(e) => run.note_error(phase, &e),
        }

        match run.profile.known_address() {
            Some(address) => {
                debug!(device = %run.profile.name, %address, "using configured address");
                run.use_address(address, false);
                true
            }
            None => false,
        }
    }

    /// One bounded discovery for the profile's name
    pub(crate) async fn discover(
        &self,
        run: &RunContext<'_>,
        limit: Instant,
    ) -> Result<Option<DiscoveryResult>, PlaybackError> {
        let timeout = self.timings.mdns_discovery_timeout;
        let until = (Instant::now() + timeout + self.timings.getinfo_timeout).min(limit);
        let found = self
            .bounded(
                "discovery",
                until,
                self.discovery.discover(Some(run.profile.name.as_str()), timeout),
            )
            .await?;
        if let Some(result) = &found {
            info!(device = %run.profile.name, address = %result.address, "discovered device");
        }
        Ok(found)
    }

    async fn get_info_phase(&self, run: &mut RunContext<'_>) -> bool {
        let guard = run.metrics.begin_phase(Phase::GetInfo);
        if run.address.is_none() && !self.resolve_address(run, Phase::GetInfo).await {
            run.note_error(
                Phase::GetInfo,
                &PlaybackError::DeviceAbsent("no network address known".to_string()),
            );
            run.metrics.end_phase(guard, false);
            return false;
        }

        let limit = run.hard_deadline;
        let ok = match run.address.clone() {
            Some(address) => self.touch(run, &address, limit, Phase::GetInfo).await,
            None => false,
        };
        run.metrics.end_phase(guard, ok);
        ok
    }

    /// getInfo against `address`; learns names on success
    pub(crate) async fn touch(
        &self,
        run: &mut RunContext<'_>,
        address: &DeviceAddress,
        limit: Instant,
        phase: Phase,
    ) -> bool {
        let until = (Instant::now() + self.timings.getinfo_timeout).min(limit);
        let timeout = until.saturating_duration_since(Instant::now());
        match self
            .bounded("get_info", until, self.zeroconf.get_info(address, timeout))
            .await
        {
            Ok(info) => {
                for name in info.name_candidates() {
                    run.metrics.profile_update.learn_name(&name);
                }
                run.reach(DeviceState::LocalAwake);
                run.last_wake_signal = Some(Instant::now());
                true
            }
            Err(e) => {
                run.note_error(phase, &e);
                false
            }
        }
    }

    async fn add_user_phase(&self, run: &mut RunContext<'_>) -> bool {
        let guard = run.metrics.begin_phase(Phase::AddUser);
        let limit = run.hard_deadline;
        let Some(address) = run.address.clone().filter(|_| Instant::now() < limit) else {
            run.metrics.end_phase(guard, false);
            return false;
        };

        let ok = self.register(run, &address, limit, Phase::AddUser).await;
        if ok {
            run.add_user_ok = true;
            let settle_until = (Instant::now() + self.timings.adduser_settle).min(limit);
            debug!(device = %run.profile.name, "waiting for device to register with the cloud");
            sleep_until(settle_until).await;
        }
        run.metrics.end_phase(guard, ok);
        ok
    }

    /// Refresh token, addUser, refresh token again
    pub(crate) async fn register(
        &self,
        run: &mut RunContext<'_>,
        address: &DeviceAddress,
        limit: Instant,
        phase: Phase,
    ) -> bool {
        let mode = run.profile.auth_mode;
        let mut accepted = match self.credentials_for(mode, limit).await {
            Ok(credentials) => self.add_user(run, address, &credentials, mode, limit, phase).await,
            Err(e) => {
                run.note_error(phase, &e);
                false
            }
        };

        if !accepted && mode == AuthMode::AccessToken {
            if let Some(blob) = self.blob_credentials.clone() {
                debug!(device = %run.profile.name, "retrying addUser with blob credentials");
                accepted = self
                    .add_user(run, address, &blob, AuthMode::BlobClientKey, limit, phase)
                    .await;
            }
        }

        if accepted {
            run.reach(DeviceState::LoggedIn);
            run.last_wake_signal = Some(Instant::now());
            if let Err(e) = self
                .bounded("refresh_token", self.call_limit(limit), self.api.refresh_token())
                .await
            {
                debug!(error = %e, "token refresh after addUser failed");
            }
        }
        accepted
    }

    async fn credentials_for(
        &self,
        mode: AuthMode,
        limit: Instant,
    ) -> Result<AddUserCredentials, PlaybackError> {
        match mode {
            AuthMode::AccessToken => {
                let token = self
                    .bounded("refresh_token", self.call_limit(limit), self.api.refresh_token())
                    .await?;
                Ok(AddUserCredentials::access_token(token))
            }
            AuthMode::BlobClientKey => self.blob_credentials.clone().ok_or_else(|| {
                ConfigError::Missing("blob_credentials for blob_client_key mode".to_string()).into()
            }),
        }
    }

    async fn add_user(
        &self,
        run: &mut RunContext<'_>,
        address: &DeviceAddress,
        credentials: &AddUserCredentials,
        mode: AuthMode,
        limit: Instant,
        phase: Phase,
    ) -> bool {
        let until = (Instant::now() + self.timings.adduser_timeout).min(limit);
        let timeout = until.saturating_duration_since(Instant::now());
        match self
            .bounded(
                "add_user",
                until,
                self.zeroconf.add_user(address, credentials, mode, timeout),
            )
            .await
        {
            Ok(()) => {
                info!(device = %run.profile.name, %address, %mode, "device accepted addUser");
                true
            }
            Err(e) => {
                run.note_error(phase, &e);
                false
            }
        }
    }

    async fn poll_phase(&self, run: &mut RunContext<'_>) -> Option<String> {
        let guard = run.metrics.begin_phase(Phase::Polling);
        let timings = &self.timings;
        let limit = run.hard_deadline;
        let start = Instant::now();

        let mut window = timings.total_poll_deadline;
        if run.add_user_ok {
            window += timings.poll_deadline_extension;
        }
        let window_end = (start + window)
            .min(run.effective_deadline + run.profile.max_wake_wait)
            .min(limit);

        let mut attempts = 0u32;
        let found = loop {
            attempts += 1;
            if attempts > 1 && (attempts - 1) % timings.token_refresh_every == 0 {
                if let Err(e) = self
                    .bounded("access_token", self.call_limit(window_end), self.api.access_token())
                    .await
                {
                    debug!(error = %e, "token refresh during polling failed");
                }
            }

            match self.find_cloud_device(run, limit).await {
                Ok(Some(id)) => break Some(id),
                Ok(None) => {}
                Err(e) => run.note_error(Phase::Polling, &e),
            }

            let now = Instant::now();
            if now >= window_end {
                break None;
            }
            let recently_woken = run
                .last_wake_signal
                .is_some_and(|at| now.duration_since(at) < timings.poll_fast_period);
            let pause = if recently_woken {
                timings.poll_sleep_fast
            } else {
                timings.poll_sleep_slow
            };
            sleep_until((now + pause).min(window_end)).await;
        };

        run.metrics.poll_attempts += attempts;
        run.metrics.end_phase(guard, found.is_some());
        match &found {
            Some(_) => info!(device = %run.profile.name, attempts, "device visible in cloud"),
            None => {
                warn!(device = %run.profile.name, attempts, "device not visible before polling window ended");
                run.failure_cause.get_or_insert_with(|| {
                    "device did not appear in the cloud device list in time".to_string()
                });
            }
        }
        found
    }

    /// List cloud devices and return the id of the profile's device
    ///
    /// Only exact (case-insensitive) name or id matches count; another
    /// device is never substituted.
    pub(crate) async fn find_cloud_device(
        &self,
        run: &mut RunContext<'_>,
        limit: Instant,
    ) -> Result<Option<String>, PlaybackError> {
        let devices = self
            .bounded("list_devices", self.call_limit(limit), self.api.list_devices())
            .await?;

        let Some(device) = devices.iter().find(|d| run.matches_device(d)) else {
            return Ok(None);
        };
        let Some(id) = device.id.clone() else {
            debug!(device = %device.name, "matching device has no id (restricted)");
            return Ok(None);
        };

        run.note_cloud_device(device);
        run.reach(DeviceState::CloudVisible);
        Ok(Some(id))
    }

    /// Transfer, volume, start, then confirm playback.
    pub(crate) async fn play_and_confirm(
        &self,
        run: &mut RunContext<'_>,
        device_id: &str,
        limit: Instant,
        debounce: bool,
    ) -> Result<(), PlaybackError> {
        if debounce {
            sleep_until((Instant::now() + self.timings.debounce_after_seen).min(limit)).await;
        }
        if run.effective_deadline > Instant::now() {
            debug!(device = %run.profile.name, "device ready, waiting for the deadline");
            sleep_until(run.effective_deadline).await;
        }

        let guard = run.metrics.begin_phase(Phase::Play);
        let result = self.play(run, device_id, limit).await;
        run.metrics.end_phase(guard, result.is_ok());
        if let Err(e) = &result {
            run.note_error(Phase::Play, e);
        }
        result
    }

    async fn play(
        &self,
        run: &mut RunContext<'_>,
        device_id: &str,
        limit: Instant,
    ) -> Result<(), PlaybackError> {
        let api = &self.api;
        self.retry_on_404("transfer_playback", limit, || api.transfer_playback(device_id, false))
            .await?;
        run.reach(DeviceState::Staged);

        if let Err(e) = self
            .bounded(
                "set_volume",
                self.call_limit(limit),
                api.set_volume(device_id, run.profile.volume),
            )
            .await
        {
            warn!(device = %run.profile.name, error = %e, "could not set volume, continuing");
        }

        let context_uri = run.context_uri.clone();
        let shuffle = run.shuffle;
        self.retry_on_404("start_context", limit, || {
            api.start_context(device_id, &context_uri, shuffle)
        })
        .await?;

        self.confirm_playing(run, device_id, limit).await
    }

    async fn confirm_playing(
        &self,
        run: &mut RunContext<'_>,
        device_id: &str,
        limit: Instant,
    ) -> Result<(), PlaybackError> {
        let confirm_until = (Instant::now() + self.timings.failover_fire_after).min(limit);
        loop {
            match self
                .bounded("current_playback", self.call_limit(limit), self.api.current_playback())
                .await
            {
                Ok(Some(state)) if state.is_playing_on(device_id) => {
                    run.reach(DeviceState::Playing);
                    info!(device = %run.profile.name, "playback confirmed");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "playback confirmation check failed"),
            }

            let next = Instant::now() + self.timings.confirmation_sleep;
            if next >= confirm_until {
                break;
            }
            sleep_until(next).await;
        }
        Err(PlaybackError::Timeout {
            phase: "playback confirmation",
        })
    }

    /// Run `call` once more after a short delay if the device was not found
    async fn retry_on_404<F, Fut>(
        &self,
        operation: &'static str,
        limit: Instant,
        mut call: F,
    ) -> Result<(), PlaybackError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = connect_api::Result<()>>,
    {
        match self.bounded(operation, self.call_limit(limit), call()).await {
            Err(e) if e.is_device_absent() => {
                debug!(operation, "device not found, retrying once");
                sleep_until((Instant::now() + self.timings.retry_404_delay).min(limit)).await;
                self.bounded(operation, self.call_limit(limit), call()).await
            }
            other => other,
        }
    }

    /// Per-call deadline: the call timeout, never past `limit`
    pub(crate) fn call_limit(&self, limit: Instant) -> Instant {
        (Instant::now() + self.timings.api_call_timeout).min(limit)
    }

    pub(crate) async fn bounded<T, E, F>(
        &self,
        operation: &'static str,
        until: Instant,
        call: F,
    ) -> Result<T, PlaybackError>
    where
        F: Future<Output = Result<T, E>>,
        PlaybackError: From<E>,
    {
        match timeout_at(until, call).await {
            Ok(result) => result.map_err(PlaybackError::from),
            Err(_) => Err(PlaybackError::Timeout { phase: operation }),
        }
    }
}
