//! Fakes for driving an `AlarmSystem` without a network

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use connect_api::{ApiError, ClientCredentials, CloudDevice, PlaybackApi, PlaybackContext, PlaybackState};
use connect_discovery::{DeviceDiscovery, DiscoveryResult};
use wakeify::{
    AlarmConfig, AlarmSystem, BackgroundIntervals, CircuitBreaker, DeviceProfile,
    InMemoryProfileStore,
};
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

pub fn config(devices: Vec<DeviceProfile>) -> AlarmConfig {
    AlarmConfig {
        credentials: ClientCredentials::new("client-id", "client-secret", "refresh-token"),
        devices,
        default_context_uri: Some(CONTEXT.to_string()),
        ..Default::default()
    }
}

pub fn count(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::SeqCst)
}

#[derive(Clone)]
pub struct FakeApi {
    pub registered: Arc<AtomicBool>,
    pub playback: Arc<Mutex<Option<PlaybackState>>>,
    pub list_calls: Arc<AtomicU32>,
    pub start_calls: Arc<AtomicU32>,
    pub pause_calls: Arc<AtomicU32>,
    pub access_calls: Arc<AtomicU32>,
}

impl FakeApi {
    pub fn new(registered: Arc<AtomicBool>) -> Self {
        Self {
            registered,
            playback: Arc::new(Mutex::new(None)),
            list_calls: Arc::new(AtomicU32::new(0)),
            start_calls: Arc::new(AtomicU32::new(0)),
            pause_calls: Arc::new(AtomicU32::new(0)),
            access_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |p| p.is_playing)
    }
}

#[async_trait]
impl PlaybackApi for FakeApi {
    async fn list_devices(&self) -> connect_api::Result<Vec<CloudDevice>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.registered.load(Ordering::SeqCst) {
            Ok(vec![CloudDevice::new(DEVICE_ID, DEVICE_NAME)])
        } else {
            Ok(Vec::new())
        }
    }

    async fn transfer_playback(&self, device_id: &str, _play: bool) -> connect_api::Result<()> {
        if !self.registered.load(Ordering::SeqCst) || device_id != DEVICE_ID {
            return Err(ApiError::DeviceNotFound("Device not found".to_string()));
        }
        Ok(())
    }

    async fn set_volume(&self, _device_id: &str, _volume_percent: u8) -> connect_api::Result<()> {
        Ok(())
    }

    async fn start_context(
        &self,
        device_id: &str,
        context_uri: &str,
        shuffle: bool,
    ) -> connect_api::Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
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
        Ok(self.playback.lock().unwrap().clone())
    }

    async fn pause(&self, _device_id: &str) -> connect_api::Result<()> {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
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
        Ok("fresh-token".to_string())
    }
}

/// Device endpoint that registers the account on addUser
#[derive(Clone)]
pub struct FakeZeroconf {
    pub registered: Arc<AtomicBool>,
    pub alive: Arc<AtomicBool>,
    pub info_calls: Arc<AtomicU32>,
    pub add_user_calls: Arc<AtomicU32>,
}

impl FakeZeroconf {
    pub fn new(registered: Arc<AtomicBool>) -> Self {
        Self {
            registered,
            alive: Arc::new(AtomicBool::new(true)),
            info_calls: Arc::new(AtomicU32::new(0)),
            add_user_calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl ZeroconfApi for FakeZeroconf {
    async fn get_info(&self, _address: &DeviceAddress, timeout: Duration) -> zeroconf_client::Result<DeviceInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ZeroconfError::Timeout(timeout));
        }
        Ok(DeviceInfo {
            remote_name: Some(DEVICE_NAME.to_string()),
            ..Default::default()
        })
    }

    async fn add_user(
        &self,
        _address: &DeviceAddress,
        credentials: &AddUserCredentials,
        mode: AuthMode,
        timeout: Duration,
    ) -> zeroconf_client::Result<()> {
        self.add_user_calls.fetch_add(1, Ordering::SeqCst);
        credentials.payload(mode)?;
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ZeroconfError::Timeout(timeout));
        }
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self, _address: &DeviceAddress, _timeout: Duration) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FakeDiscovery {
    pub result: Option<DiscoveryResult>,
    pub discover_all_calls: Arc<AtomicU32>,
    /// Simulated length of a `discover_all` sweep
    pub sweep_delay: Arc<Mutex<Duration>>,
}

#[async_trait]
impl DeviceDiscovery for FakeDiscovery {
    async fn discover(
        &self,
        hint: Option<&str>,
        _timeout: Duration,
    ) -> connect_discovery::Result<Option<DiscoveryResult>> {
        Ok(self
            .result
            .clone()
            .filter(|r| hint.map_or(true, |h| r.matches(h).is_some())))
    }

    async fn discover_all(&self, _timeout: Duration) -> connect_discovery::Result<Vec<DiscoveryResult>> {
        self.discover_all_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sweep_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.result.clone().into_iter().collect())
    }
}

/// A system wired to fakes, with handles to inspect them
pub struct TestSystem {
    pub system: AlarmSystem,
    pub api: FakeApi,
    pub zeroconf: FakeZeroconf,
    pub discovery: FakeDiscovery,
    pub store: Arc<InMemoryProfileStore>,
    pub breaker: Arc<CircuitBreaker>,
}

impl TestSystem {
    /// `listed`: whether the device is in the cloud list from the start
    pub fn new(devices: Vec<DeviceProfile>, listed: bool) -> Self {
        Self::with_config(config(devices), listed, InMemoryProfileStore::new())
    }

    pub fn with_config(config: AlarmConfig, listed: bool, store: InMemoryProfileStore) -> Self {
        let registered = Arc::new(AtomicBool::new(listed));
        let api = FakeApi::new(registered.clone());
        let zeroconf = FakeZeroconf::new(registered);
        let discovery = FakeDiscovery {
            result: Some(discovery_result()),
            discover_all_calls: Arc::new(AtomicU32::new(0)),
            sweep_delay: Arc::new(Mutex::new(Duration::ZERO)),
        };
        let store = Arc::new(store);
        let breaker = Arc::new(CircuitBreaker::new());

        let system = AlarmSystem::builder(config)
            .with_api(Arc::new(api.clone()))
            .with_zeroconf(Arc::new(zeroconf.clone()))
            .with_discovery(Arc::new(discovery.clone()))
            .with_store(store.clone())
            .with_breaker(breaker.clone())
            .with_intervals(BackgroundIntervals {
                discovery_refresh: Duration::from_secs(120),
                presence: Duration::from_secs(60),
            })
            .build()
            .expect("test config is valid");

        Self {
            system,
            api,
            zeroconf,
            discovery,
            store,
            breaker,
        }
    }
}
