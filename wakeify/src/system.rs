//! AlarmSystem - process-wide entry point
//!
//! Owns everything that outlives a single alarm run: the device registry, the
//! circuit breaker and discovery cache shared by all runs, the client handles
//! and the background upkeep tasks.

use std::collections::HashMap;
use std::sync::Arc;

use alarm_playback::{
    validate_context_uri, AlarmConfig, AlarmRequest, BreakerSnapshot, CircuitBreaker, ConfigError,
    DeviceProfile, Orchestrator, ProfileUpdate, RunMetrics, Timings,
};
use chrono::{DateTime, Utc};
use connect_api::{ApiError, PlaybackApi, TokenManager, WebApiClient};
use connect_discovery::{DeviceDiscovery, DiscoveryCache, MdnsDiscovery};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroconf_client::{AddUserCredentials, DeviceAddress, ZeroconfApi, ZeroconfClient};

use crate::background::{BackgroundIntervals, BackgroundTasks};
use crate::error::{AlarmError, Result};
use crate::store::{InMemoryProfileStore, ProfileStore};

/// State the background tasks need alongside the system
pub(crate) struct Shared {
    pub(crate) profiles: RwLock<HashMap<String, DeviceProfile>>,
    pub(crate) discovery: Arc<dyn DeviceDiscovery>,
    pub(crate) zeroconf: Arc<dyn ZeroconfApi>,
    pub(crate) api: Arc<dyn PlaybackApi>,
    pub(crate) cache: DiscoveryCache,
    pub(crate) timings: Timings,
    pub(crate) blob_credentials: Option<AddUserCredentials>,
    /// Device key -> id of the run currently using it
    pub(crate) in_flight: DashMap<String, Uuid>,
}

impl Shared {
    pub(crate) fn profile(&self, name: &str) -> Option<DeviceProfile> {
        self.profiles.read().get(&registry_key(name)).cloned()
    }

    pub(crate) fn profile_list(&self) -> Vec<DeviceProfile> {
        let mut profiles: Vec<_> = self.profiles.read().values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }
}

fn registry_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Everything known about one device, for status displays
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub profile: DeviceProfile,
    /// `None` when the device has never failed
    pub breaker: Option<BreakerSnapshot>,
    pub cached_address: Option<DeviceAddress>,
    /// `None` when the cloud list could not be fetched
    pub cloud_visible: Option<bool>,
    pub run_in_progress: bool,
}

/// Removes the in-flight marker when a run ends, however it ends
struct RunGuard<'a> {
    in_flight: &'a DashMap<String, Uuid>,
    key: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Main entry point for scheduling-agnostic alarm playback
///
/// The caller decides *when* to call [`AlarmSystem::run_alarm`]; the system
/// makes sure only one run per device is active and remembers what each run
/// learned about the device.
///
/// # Example
///
/// ```rust,ignore
/// use wakeify::{AlarmConfig, AlarmSystem};
///
/// let config = AlarmConfig::load("wakeify.json".as_ref())?;
/// let system = AlarmSystem::from_config(config)?;
/// system.start_background();
///
/// let deadline = chrono::Utc::now() + chrono::Duration::minutes(2);
/// let metrics = system.run_alarm("Kitchen", None, None, deadline).await?;
/// println!("{}: {}", metrics.branch, metrics.success);
///
/// system.shutdown().await;
/// ```
pub struct AlarmSystem {
    shared: Arc<Shared>,
    orchestrator: Orchestrator,
    breaker: Arc<CircuitBreaker>,
    store: Arc<dyn ProfileStore>,
    default_context_uri: Option<String>,
    shuffle: bool,
    intervals: BackgroundIntervals,
    background: Mutex<Option<BackgroundTasks>>,
}

impl AlarmSystem {
    /// Build a system with the real HTTP and mDNS clients
    pub fn from_config(config: AlarmConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: AlarmConfig) -> AlarmSystemBuilder {
        AlarmSystemBuilder::new(config)
    }

    /// Run an alarm for `device` that should be audible at `deadline`.
    ///
    /// `context_uri` and `shuffle` fall back to the configured defaults. A
    /// deadline in the past means "as soon as possible". Only one run per
    /// device may be active at a time.
    pub async fn run_alarm(
        &self,
        device: &str,
        context_uri: Option<&str>,
        shuffle: Option<bool>,
        deadline: DateTime<Utc>,
    ) -> Result<RunMetrics> {
        let profile = self
            .shared
            .profile(device)
            .ok_or_else(|| AlarmError::UnknownDevice(device.to_string()))?;

        let context = context_uri
            .map(str::to_string)
            .or_else(|| self.default_context_uri.clone())
            .ok_or_else(|| ConfigError::Missing("context uri".to_string()))?;
        validate_context_uri(&context)?;

        let until = (deadline - Utc::now()).to_std().unwrap_or_default();
        let request = AlarmRequest::new(context, Instant::now() + until)
            .with_shuffle(shuffle.unwrap_or(self.shuffle));

        let guard = self.begin_run(&profile)?;
        info!(
            device = %profile.name,
            deadline = %deadline,
            in_ms = until.as_millis() as u64,
            "Alarm run scheduled"
        );
        let metrics = self.orchestrator.run_alarm(&profile, request).await;
        drop(guard);

        self.learn(&profile.key(), &metrics.profile_update).await;
        Ok(metrics)
    }

    /// Run an alarm with the deadline set to now
    pub async fn run_alarm_now(&self, device: &str, context_uri: Option<&str>) -> Result<RunMetrics> {
        self.run_alarm(device, context_uri, None, Utc::now()).await
    }

    fn begin_run(&self, profile: &DeviceProfile) -> Result<RunGuard<'_>> {
        let key = profile.key();
        match self.shared.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(AlarmError::RunInProgress(profile.name.clone())),
            Entry::Vacant(slot) => {
                slot.insert(Uuid::new_v4());
                Ok(RunGuard {
                    in_flight: &self.shared.in_flight,
                    key,
                })
            }
        }
    }

    /// Merge a run's findings into the registry and persist them
    async fn learn(&self, key: &str, update: &ProfileUpdate) {
        if update.is_empty() {
            return;
        }

        let updated = {
            let mut profiles = self.shared.profiles.write();
            match profiles.get_mut(key) {
                Some(profile) => {
                    if profile.apply(update) {
                        Some(profile.clone())
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(profile) = updated {
            debug!(device = %profile.name, ?update, "Profile updated from run");
            if let Err(e) = self.store.save(&profile).await {
                warn!(device = %profile.name, error = %e, "Failed to persist learned profile");
            }
        }
    }

    /// Pause playback on the device
    pub async fn stop_playback(&self, device: &str) -> Result<()> {
        let profile = self
            .shared
            .profile(device)
            .ok_or_else(|| AlarmError::UnknownDevice(device.to_string()))?;

        let listed = self.shared.api.list_devices().await?;
        let id = listed
            .iter()
            .filter(|d| profile.matches_cloud_device(d))
            .find_map(|d| d.id.clone())
            .or_else(|| profile.cloud_device_id.clone())
            .ok_or_else(|| ApiError::DeviceNotFound(profile.name.clone()))?;

        self.shared.api.pause(&id).await?;
        info!(device = %profile.name, "Playback paused");
        Ok(())
    }

    /// Profile, breaker, cache and cloud visibility for one device
    pub async fn device_status(&self, device: &str) -> Result<DeviceStatus> {
        let profile = self
            .shared
            .profile(device)
            .ok_or_else(|| AlarmError::UnknownDevice(device.to_string()))?;
        let key = profile.key();

        let breaker = self.breaker.snapshot().into_iter().find(|s| s.device == key);
        let cached_address = self.shared.cache.get_any(&profile.name).map(|r| r.address);
        let cloud_visible = match self.shared.api.list_devices().await {
            Ok(devices) => Some(devices.iter().any(|d| profile.matches_cloud_device(d))),
            Err(e) => {
                debug!(device = %profile.name, error = %e, "Status could not list cloud devices");
                None
            }
        };
        let run_in_progress = self.shared.in_flight.contains_key(&key);

        Ok(DeviceStatus {
            profile,
            breaker,
            cached_address,
            cloud_visible,
            run_in_progress,
        })
    }

    /// Close the device's breaker; returns whether it had any state
    pub fn reset_circuit_breaker(&self, device: &str) -> Result<bool> {
        let profile = self
            .shared
            .profile(device)
            .ok_or_else(|| AlarmError::UnknownDevice(device.to_string()))?;
        let had_state = self.breaker.reset(&profile.key());
        info!(device = %profile.name, had_state, "Circuit breaker reset");
        Ok(had_state)
    }

    /// All registered profiles, sorted by name
    pub fn profiles(&self) -> Vec<DeviceProfile> {
        self.shared.profile_list()
    }

    pub fn profile(&self, device: &str) -> Option<DeviceProfile> {
        self.shared.profile(device)
    }

    /// Add or replace a device profile and persist it
    pub async fn upsert_profile(&self, profile: DeviceProfile) -> Result<()> {
        profile.validate(self.shared.blob_credentials.is_some())?;
        self.shared
            .profiles
            .write()
            .insert(profile.key(), profile.clone());
        self.store.save(&profile).await
    }

    /// Merge profiles from the store over the configured ones
    ///
    /// Returns how many stored profiles were loaded.
    pub async fn restore_profiles(&self) -> Result<usize> {
        let stored = self.store.load_all().await?;
        let count = stored.len();
        let mut profiles = self.shared.profiles.write();
        for profile in stored {
            profiles.insert(profile.key(), profile);
        }
        Ok(count)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn api(&self) -> &Arc<dyn PlaybackApi> {
        &self.shared.api
    }

    pub fn zeroconf(&self) -> &Arc<dyn ZeroconfApi> {
        &self.shared.zeroconf
    }

    pub fn discovery(&self) -> &Arc<dyn DeviceDiscovery> {
        &self.shared.discovery
    }

    /// Blob credentials from the config, for `blob_client_key` devices
    pub fn blob_credentials(&self) -> Option<&AddUserCredentials> {
        self.shared.blob_credentials.as_ref()
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.shared.cache
    }

    pub fn timings(&self) -> &Timings {
        &self.shared.timings
    }

    pub fn is_running(&self, device: &str) -> bool {
        self.shared.in_flight.contains_key(&registry_key(device))
    }

    /// Start discovery refresh and cloud presence upkeep
    ///
    /// Returns `false` if they were already running.
    pub fn start_background(&self) -> bool {
        let mut background = self.background.lock();
        if background.is_some() {
            return false;
        }
        *background = Some(BackgroundTasks::spawn(
            Arc::clone(&self.shared),
            self.intervals,
        ));
        info!(
            discovery_refresh_s = self.intervals.discovery_refresh.as_secs(),
            presence_s = self.intervals.presence.as_secs(),
            "Background tasks started"
        );
        true
    }

    pub fn background_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Stop background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        let tasks = self.background.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
            info!("Background tasks stopped");
        }
    }
}

/// Builder for [`AlarmSystem`]
///
/// Any collaborator left unset gets its production implementation.
pub struct AlarmSystemBuilder {
    config: AlarmConfig,
    api: Option<Arc<dyn PlaybackApi>>,
    zeroconf: Option<Arc<dyn ZeroconfApi>>,
    discovery: Option<Arc<dyn DeviceDiscovery>>,
    store: Option<Arc<dyn ProfileStore>>,
    breaker: Option<Arc<CircuitBreaker>>,
    cache: Option<DiscoveryCache>,
    intervals: BackgroundIntervals,
}

impl AlarmSystemBuilder {
    pub fn new(config: AlarmConfig) -> Self {
        Self {
            config,
            api: None,
            zeroconf: None,
            discovery: None,
            store: None,
            breaker: None,
            cache: None,
            intervals: BackgroundIntervals::default(),
        }
    }

    pub fn with_api(mut self, api: Arc<dyn PlaybackApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_zeroconf(mut self, zeroconf: Arc<dyn ZeroconfApi>) -> Self {
        self.zeroconf = Some(zeroconf);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DeviceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_cache(mut self, cache: DiscoveryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_intervals(mut self, intervals: BackgroundIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn build(self) -> Result<AlarmSystem> {
        let config = self.config;
        config.validate()?;

        let cache = self.cache.unwrap_or_default();
        let breaker = self
            .breaker
            .unwrap_or_else(|| Arc::new(CircuitBreaker::new()));
        let zeroconf: Arc<dyn ZeroconfApi> = match self.zeroconf {
            Some(zeroconf) => zeroconf,
            None => Arc::new(ZeroconfClient::new()),
        };
        let discovery: Arc<dyn DeviceDiscovery> = match self.discovery {
            Some(discovery) => discovery,
            None => Arc::new(
                MdnsDiscovery::new(Arc::clone(&zeroconf), cache.clone())
                    .with_info_timeout(config.timings.getinfo_timeout),
            ),
        };
        let api: Arc<dyn PlaybackApi> = match self.api {
            Some(api) => api,
            None => Arc::new(web_client(&config)?),
        };
        let store: Arc<dyn ProfileStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryProfileStore::new()),
        };

        let orchestrator = Orchestrator::new(
            Arc::clone(&discovery),
            Arc::clone(&zeroconf),
            Arc::clone(&api),
            Arc::clone(&breaker),
            cache.clone(),
        )
        .with_timings(config.timings.clone())
        .with_prewarm(config.prewarm_enabled)
        .with_blob_credentials(config.blob_credentials.clone());

        let profiles = config
            .devices
            .iter()
            .map(|p| (p.key(), p.clone()))
            .collect();

        let shared = Arc::new(Shared {
            profiles: RwLock::new(profiles),
            discovery,
            zeroconf,
            api,
            cache,
            timings: config.timings.clone(),
            blob_credentials: config.blob_credentials.clone(),
            in_flight: DashMap::new(),
        });

        info!(devices = config.devices.len(), "Alarm system ready");

        Ok(AlarmSystem {
            shared,
            orchestrator,
            breaker,
            store,
            default_context_uri: config.default_context_uri,
            shuffle: config.shuffle,
            intervals: self.intervals,
            background: Mutex::new(None),
        })
    }
}

fn web_client(config: &AlarmConfig) -> Result<WebApiClient> {
    let mut tokens = TokenManager::new(config.credentials.clone())
        .with_request_timeout(config.timings.api_call_timeout);
    if let Some(url) = &config.token_url {
        tokens = tokens.with_token_url(url.clone());
    }

    let mut client =
        WebApiClient::new(Arc::new(tokens)).with_call_timeout(config.timings.api_call_timeout);
    if let Some(url) = &config.api_base_url {
        client = client.with_base_url(url)?;
    }
    Ok(client)
}
