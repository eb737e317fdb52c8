//! In-memory collaborators for orchestrator tests
//!
//! Each fake counts its calls with atomics and can be told to fail. The cloud
//! fake lists the target device once it is "registered", which the zeroconf
//! fake sets on a successful addUser, mimicking a receiver that only shows
//! up in the cloud after it has been logged in.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alarm_playback::{CircuitBreaker, DeviceProfile, FallbackPolicy, Orchestrator, Timings};
use async_trait::async_trait;
use chrono::Utc;
use connect_api::{ApiError, CloudDevice, PlaybackApi, PlaybackContext, PlaybackState};
use connect_discovery::{DeviceDiscovery, DiscoveryCache, DiscoveryResult};
use tokio::time::Instant;
use zeroconf_client::{AddUserCredentials, AuthMode, DeviceAddress, DeviceInfo, ZeroconfApi, ZeroconfError};

pub const DEVICE_NAME: &str = "Kitchen";
pub const DEVICE_ID: &str = "cloud-kitchen";
pub const CONTEXT: &str = "spotify:playlist:37i9dQZF1DX0UrRvztWcAU";

pub fn device_ip() -> IpAddr {
    "192.168.1.50".parse().unwrap()
}

pub fn device_address() -> DeviceAddress {
    DeviceAddress::new(device_ip(), 4070, None)
}

pub fn discovery_result() -> DiscoveryResult {
    DiscoveryResult {
        address: device_address(),
        instance_name: "Kitchen-a1b2c3d4e5".to_string(),
        txt: HashMap::new(),
        friendly_names: vec![DEVICE_NAME.to_string()],
        discovered_at: Utc::now(),
    }
}

pub fn profile() -> DeviceProfile {
    DeviceProfile::new(DEVICE_NAME)
}

pub fn profile_with_policy(policy: FallbackPolicy) -> DeviceProfile {
    DeviceProfile::new(DEVICE_NAME).with_fallback_policy(policy)
}

/// Cloud API fake
#[derive(Clone)]
pub struct FakeApi {
    /// The target device is in the device list
    pub registered: Arc<AtomicBool>,
    /// Other devices that are always listed
    pub others: Arc<Mutex<Vec<CloudDevice>>>,
    pub playback: Arc<Mutex<Option<PlaybackState>>>,
    /// Transfers to an unlisted device fail with 404
    pub reject_unlisted: Arc<AtomicBool>,
    /// Number of upcoming transfers that fail with 404
    pub transfer_404s: Arc<AtomicU32>,
    /// Simulated latency of `list_devices`
    pub list_delay: Arc<Mutex<Duration>>,
    pub list_calls: Arc<AtomicU32>,
    pub transfer_calls: Arc<AtomicU32>,
    pub volume_calls: Arc<AtomicU32>,
    pub start_calls: Arc<AtomicU32>,
    pub playback_calls: Arc<AtomicU32>,
    pub refresh_calls: Arc<AtomicU32>,
    pub access_calls: Arc<AtomicU32>,
    pub first_transfer_at: Arc<Mutex<Option<Instant>>>,
    pub last_shuffle: Arc<AtomicBool>,
}

impl FakeApi {
    pub fn new(registered: Arc<AtomicBool>) -> Self {
        Self {
            registered,
            others: Arc::new(Mutex::new(Vec::new())),
            playback: Arc::new(Mutex::new(None)),
            reject_unlisted: Arc::new(AtomicBool::new(true)),
            transfer_404s: Arc::new(AtomicU32::new(0)),
            list_delay: Arc::new(Mutex::new(Duration::ZERO)),
            list_calls: Arc::new(AtomicU32::new(0)),
            transfer_calls: Arc::new(AtomicU32::new(0)),
            volume_calls: Arc::new(AtomicU32::new(0)),
            start_calls: Arc::new(AtomicU32::new(0)),
            playback_calls: Arc::new(AtomicU32::new(0)),
            refresh_calls: Arc::new(AtomicU32::new(0)),
            access_calls: Arc::new(AtomicU32::new(0)),
            first_transfer_at: Arc::new(Mutex::new(None)),
            last_shuffle: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn listed() -> Self {
        Self::new(Arc::new(AtomicBool::new(true)))
    }

    pub fn add_other(&self, id: &str, name: &str) {
        self.others.lock().unwrap().push(CloudDevice::new(id, name));
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackApi for FakeApi {
    async fn list_devices(&self) -> connect_api::Result<Vec<CloudDevice>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut devices = self.others.lock().unwrap().clone();
        if self.registered.load(Ordering::SeqCst) {
            devices.push(CloudDevice::new(DEVICE_ID, DEVICE_NAME));
        }
        Ok(devices)
    }

    async fn transfer_playback(&self, device_id: &str, _play: bool) -> connect_api::Result<()> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        self.first_transfer_at
            .lock()
            .unwrap()
            .get_or_insert_with(Instant::now);

        let pending_404 = self
            .transfer_404s
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let unlisted = !self.registered.load(Ordering::SeqCst)
            && self.reject_unlisted.load(Ordering::SeqCst);
        if pending_404 || unlisted || device_id != DEVICE_ID {
            return Err(ApiError::DeviceNotFound("Device not found".to_string()));
        }
        Ok(())
    }

    async fn set_volume(&self, _device_id: &str, _volume_percent: u8) -> connect_api::Result<()> {
        self.volume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_context(
        &self,
        device_id: &str,
        context_uri: &str,
        shuffle: bool,
    ) -> connect_api::Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.last_shuffle.store(shuffle, Ordering::SeqCst);
        *self.playback.lock().unwrap() = Some(PlaybackState {
            device: Some(CloudDevice::new(device_id, DEVICE_NAME)),
            is_playing: true,
            context: Some(PlaybackContext {
                uri: context_uri.to_string(),
            }),
            shuffle_state: shuffle,
        });
        Ok(())
    }

    async fn current_playback(&self) -> connect_api::Result<Option<PlaybackState>> {
        self.playback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.playback.lock().unwrap().clone())
    }

    async fn pause(&self, _device_id: &str) -> connect_api::Result<()> {
        if let Some(state) = self.playback.lock().unwrap().as_mut() {
            state.is_playing = false;
        }
        Ok(())
    }

    async fn access_token(&self) -> connect_api::Result<String> {
        self.access_calls.fetch_add(1, Ordering::SeqCst);
        Ok("token".to_string())
    }

    async fn refresh_token(&self) -> connect_api::Result<String> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok("fresh-token".to_string())
    }
}

/// Local device endpoint fake
#[derive(Clone)]
pub struct FakeZeroconf {
    pub registered: Arc<AtomicBool>,
    pub info_ok: Arc<AtomicBool>,
    /// Number of upcoming addUser calls that fail
    pub add_user_failures: Arc<AtomicU32>,
    pub probe_alive: Arc<AtomicBool>,
    /// Simulated time a probe takes to answer
    pub probe_delay: Arc<Mutex<Duration>>,
    pub info_calls: Arc<AtomicU32>,
    pub add_user_calls: Arc<AtomicU32>,
    pub probe_calls: Arc<AtomicU32>,
    pub addresses: Arc<Mutex<Vec<DeviceAddress>>>,
    /// Auth mode of every addUser call, in order
    pub modes: Arc<Mutex<Vec<AuthMode>>>,
}

impl FakeZeroconf {
    /// Responsive device that registers on addUser
    pub fn new(registered: Arc<AtomicBool>) -> Self {
        Self {
            registered,
            info_ok: Arc::new(AtomicBool::new(true)),
            add_user_failures: Arc::new(AtomicU32::new(0)),
            probe_alive: Arc::new(AtomicBool::new(true)),
            probe_delay: Arc::new(Mutex::new(Duration::ZERO)),
            info_calls: Arc::new(AtomicU32::new(0)),
            add_user_calls: Arc::new(AtomicU32::new(0)),
            probe_calls: Arc::new(AtomicU32::new(0)),
            addresses: Arc::new(Mutex::new(Vec::new())),
            modes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Device that answers nothing
    pub fn dead(registered: Arc<AtomicBool>) -> Self {
        let fake = Self::new(registered);
        fake.info_ok.store(false, Ordering::SeqCst);
        fake.add_user_failures.store(u32::MAX, Ordering::SeqCst);
        fake.probe_alive.store(false, Ordering::SeqCst);
        fake
    }
}

#[async_trait]
impl ZeroconfApi for FakeZeroconf {
    async fn get_info(&self, address: &DeviceAddress, timeout: Duration) -> zeroconf_client::Result<DeviceInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.addresses.lock().unwrap().push(address.clone());
        if !self.info_ok.load(Ordering::SeqCst) {
            return Err(ZeroconfError::Timeout(timeout));
        }
        Ok(DeviceInfo {
            remote_name: Some(DEVICE_NAME.to_string()),
            display_name: Some("Kitchen Amp".to_string()),
            ..Default::default()
        })
    }

    async fn add_user(
        &self,
        address: &DeviceAddress,
        credentials: &AddUserCredentials,
        mode: AuthMode,
        _timeout: Duration,
    ) -> zeroconf_client::Result<()> {
        self.add_user_calls.fetch_add(1, Ordering::SeqCst);
        self.addresses.lock().unwrap().push(address.clone());
        self.modes.lock().unwrap().push(mode);
        credentials.payload(mode)?;

        let failing = self
            .add_user_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ZeroconfError::Network("connection refused".to_string()));
        }
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self, _address: &DeviceAddress, _timeout: Duration) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.probe_alive.load(Ordering::SeqCst)
    }
}

/// Discovery fake returning a fixed result (or nothing)
#[derive(Clone)]
pub struct FakeDiscovery {
    pub result: Arc<Mutex<Option<DiscoveryResult>>>,
    pub discover_calls: Arc<AtomicU32>,
}

impl FakeDiscovery {
    pub fn finding(result: Option<DiscoveryResult>) -> Self {
        Self {
            result: Arc::new(Mutex::new(result)),
            discover_calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl DeviceDiscovery for FakeDiscovery {
    async fn discover(
        &self,
        hint: Option<&str>,
        _timeout: Duration,
    ) -> connect_discovery::Result<Option<DiscoveryResult>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.result.lock().unwrap().clone();
        Ok(result.filter(|r| hint.map_or(true, |h| r.matches(h).is_some())))
    }

    async fn discover_all(&self, _timeout: Duration) -> connect_discovery::Result<Vec<DiscoveryResult>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.lock().unwrap().clone().into_iter().collect())
    }
}

/// All fakes wired into an orchestrator
pub struct Harness {
    pub api: FakeApi,
    pub zeroconf: FakeZeroconf,
    pub discovery: FakeDiscovery,
    pub breaker: Arc<CircuitBreaker>,
    pub cache: DiscoveryCache,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn build(api: FakeApi, zeroconf: FakeZeroconf, discovery: FakeDiscovery) -> Self {
        let breaker = Arc::new(CircuitBreaker::new());
        let cache = DiscoveryCache::new();
        let orchestrator = Orchestrator::new(
            Arc::new(discovery.clone()),
            Arc::new(zeroconf.clone()),
            Arc::new(api.clone()),
            breaker.clone(),
            cache.clone(),
        )
        .with_timings(Timings::default());
        Self {
            api,
            zeroconf,
            discovery,
            breaker,
            cache,
            orchestrator,
        }
    }

    pub fn configure(mut self, f: impl FnOnce(Orchestrator) -> Orchestrator) -> Self {
        self.orchestrator = f(self.orchestrator);
        self
    }

    /// Device listed in the cloud from the start
    pub fn visible() -> Self {
        let registered = Arc::new(AtomicBool::new(true));
        Self::build(
            FakeApi::new(registered.clone()),
            FakeZeroconf::new(registered),
            FakeDiscovery::finding(Some(discovery_result())),
        )
    }

    /// Device asleep: discoverable, registers in the cloud after addUser
    pub fn sleeping() -> Self {
        let registered = Arc::new(AtomicBool::new(false));
        Self::build(
            FakeApi::new(registered.clone()),
            FakeZeroconf::new(registered),
            FakeDiscovery::finding(Some(discovery_result())),
        )
    }

    /// Device that answers locally and accepts addUser but never reaches the cloud
    pub fn unlisted() -> Self {
        Self::build(
            FakeApi::new(Arc::new(AtomicBool::new(false))),
            FakeZeroconf::new(Arc::new(AtomicBool::new(false))),
            FakeDiscovery::finding(Some(discovery_result())),
        )
    }

    /// Device that never shows up anywhere
    pub fn absent() -> Self {
        let registered = Arc::new(AtomicBool::new(false));
        Self::build(
            FakeApi::new(registered.clone()),
            FakeZeroconf::dead(registered),
            FakeDiscovery::finding(None),
        )
    }
}
