//! Configuration types for alarm playback
//!
//! [`Timings`] controls every phase of a run, [`DeviceProfile`] describes one
//! receiver, and [`AlarmConfig`] ties them to the account credentials. All of
//! it is loaded once, validated, and read-only while a run executes.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use connect_api::{ClientCredentials, CloudDevice};
use serde::{Deserialize, Serialize};
use zeroconf_client::{AddUserCredentials, AuthMode, DeviceAddress};

use crate::error::ConfigError;
use crate::metrics::ProfileUpdate;

/// Durations serialised as fractional seconds
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(|_| {
            serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}",
                seconds
            ))
        })
    }
}

/// Phase offsets, poll cadence and timeouts for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Pre-warm discovery this long before the deadline
    #[serde(with = "secs")]
    pub prewarm_offset: Duration,
    #[serde(with = "secs")]
    pub getinfo_offset: Duration,
    #[serde(with = "secs")]
    pub adduser_offset: Duration,

    /// Poll fast while a local wake signal is younger than this
    #[serde(with = "secs")]
    pub poll_fast_period: Duration,
    #[serde(with = "secs")]
    pub total_poll_deadline: Duration,
    /// Extra polling granted when addUser succeeded
    #[serde(with = "secs")]
    pub poll_deadline_extension: Duration,
    #[serde(with = "secs")]
    pub poll_sleep_fast: Duration,
    #[serde(with = "secs")]
    pub poll_sleep_slow: Duration,
    /// Refresh the token every N poll attempts
    pub token_refresh_every: u32,

    #[serde(with = "secs")]
    pub debounce_after_seen: Duration,
    #[serde(with = "secs")]
    pub retry_404_delay: Duration,
    /// How long to wait for playback confirmation before failing over
    #[serde(with = "secs")]
    pub failover_fire_after: Duration,
    #[serde(with = "secs")]
    pub confirmation_sleep: Duration,
    #[serde(with = "secs")]
    pub adduser_settle: Duration,

    #[serde(with = "secs")]
    pub mdns_discovery_timeout: Duration,
    #[serde(with = "secs")]
    pub getinfo_timeout: Duration,
    #[serde(with = "secs")]
    pub adduser_timeout: Duration,
    #[serde(with = "secs")]
    pub api_call_timeout: Duration,

    /// Hard deadline for the primary path, measured from the alarm deadline
    #[serde(with = "secs")]
    pub failover_threshold: Duration,
    /// Total time the fallback sequence may take
    #[serde(with = "secs")]
    pub fallback_budget: Duration,
    /// Brief device-list polling after a fallback wake attempt
    #[serde(with = "secs")]
    pub fallback_recheck_window: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            prewarm_offset: Duration::from_secs(60),
            getinfo_offset: Duration::from_secs(30),
            adduser_offset: Duration::from_secs(10),
            poll_fast_period: Duration::from_secs(5),
            total_poll_deadline: Duration::from_secs(20),
            poll_deadline_extension: Duration::from_secs(15),
            poll_sleep_fast: Duration::from_millis(500),
            poll_sleep_slow: Duration::from_secs(1),
            token_refresh_every: 5,
            debounce_after_seen: Duration::from_millis(600),
            retry_404_delay: Duration::from_millis(700),
            failover_fire_after: Duration::from_secs(2),
            confirmation_sleep: Duration::from_millis(200),
            adduser_settle: Duration::from_secs(5),
            mdns_discovery_timeout: Duration::from_millis(1500),
            getinfo_timeout: Duration::from_millis(1500),
            adduser_timeout: Duration::from_millis(2500),
            api_call_timeout: Duration::from_secs(3),
            failover_threshold: Duration::from_secs(45),
            fallback_budget: Duration::from_secs(30),
            fallback_recheck_window: Duration::from_secs(4),
        }
    }
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longer waits for receivers that take a long time to register
    pub fn slow_receivers() -> Self {
        Self {
            total_poll_deadline: Duration::from_secs(40),
            poll_deadline_extension: Duration::from_secs(20),
            adduser_settle: Duration::from_secs(8),
            failover_threshold: Duration::from_secs(70),
            fallback_budget: Duration::from_secs(45),
            ..Default::default()
        }
    }

    /// Validate the timings and return the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("prewarm_offset", self.prewarm_offset, 10.0, 300.0)?;
        check_range("poll_fast_period", self.poll_fast_period, 1.0, 20.0)?;
        check_range("total_poll_deadline", self.total_poll_deadline, 5.0, 60.0)?;
        check_range("poll_deadline_extension", self.poll_deadline_extension, 0.0, 60.0)?;
        check_range("debounce_after_seen", self.debounce_after_seen, 0.1, 5.0)?;
        check_range("retry_404_delay", self.retry_404_delay, 0.1, 5.0)?;
        check_range("failover_fire_after", self.failover_fire_after, 0.5, 10.0)?;
        check_range("adduser_settle", self.adduser_settle, 0.0, 30.0)?;
        check_range("mdns_discovery_timeout", self.mdns_discovery_timeout, 0.5, 10.0)?;
        check_range("getinfo_timeout", self.getinfo_timeout, 0.5, 10.0)?;
        check_range("adduser_timeout", self.adduser_timeout, 0.5, 10.0)?;
        check_range("api_call_timeout", self.api_call_timeout, 0.5, 15.0)?;
        check_range("confirmation_sleep", self.confirmation_sleep, 0.1, 1.0)?;
        check_range("poll_sleep_fast", self.poll_sleep_fast, 0.1, 2.0)?;
        check_range("poll_sleep_slow", self.poll_sleep_slow, 0.1, 5.0)?;
        check_range("fallback_budget", self.fallback_budget, 5.0, 120.0)?;
        check_range("fallback_recheck_window", self.fallback_recheck_window, 0.5, 30.0)?;

        if self.getinfo_offset > self.prewarm_offset {
            return Err(ConfigError::Invalid(
                "getinfo_offset must not exceed prewarm_offset".to_string(),
            ));
        }
        if self.adduser_offset > self.getinfo_offset {
            return Err(ConfigError::Invalid(
                "adduser_offset must not exceed getinfo_offset".to_string(),
            ));
        }
        if self.poll_sleep_fast > self.poll_sleep_slow {
            return Err(ConfigError::Invalid(
                "poll_sleep_fast must not exceed poll_sleep_slow".to_string(),
            ));
        }
        if self.failover_threshold < self.total_poll_deadline {
            return Err(ConfigError::Invalid(
                "failover_threshold must be at least total_poll_deadline".to_string(),
            ));
        }
        if self.token_refresh_every == 0 {
            return Err(ConfigError::Invalid(
                "token_refresh_every must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound on a run's length measured from the alarm deadline
    pub fn run_bound(&self) -> Duration {
        self.failover_threshold + self.fallback_budget
    }

    pub fn with_prewarm_offset(mut self, offset: Duration) -> Self {
        self.prewarm_offset = offset;
        self
    }

    pub fn with_poll_deadline(mut self, total: Duration, extension: Duration) -> Self {
        self.total_poll_deadline = total;
        self.poll_deadline_extension = extension;
        self
    }

    pub fn with_failover(mut self, threshold: Duration, fallback_budget: Duration) -> Self {
        self.failover_threshold = threshold;
        self.fallback_budget = fallback_budget;
        self
    }
}

fn check_range(name: &str, value: Duration, min_secs: f64, max_secs: f64) -> Result<(), ConfigError> {
    let secs = value.as_secs_f64();
    if secs < min_secs || secs > max_secs {
        return Err(ConfigError::Invalid(format!(
            "{} must be between {}s and {}s, got {}s",
            name, min_secs, max_secs, secs
        )));
    }
    Ok(())
}

/// One recovery strategy of the fallback sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    QuickRecheck,
    IpWake,
    DiscoveryWake,
    Reauth,
    ForcedTransfer,
    /// Always runs last when everything else failed
    TerminalFailure,
}

impl FallbackStrategy {
    /// Configurable strategies in execution order
    pub const CONFIGURABLE: [FallbackStrategy; 5] = [
        FallbackStrategy::QuickRecheck,
        FallbackStrategy::IpWake,
        FallbackStrategy::DiscoveryWake,
        FallbackStrategy::Reauth,
        FallbackStrategy::ForcedTransfer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FallbackStrategy::QuickRecheck => "quick_recheck",
            FallbackStrategy::IpWake => "ip_wake",
            FallbackStrategy::DiscoveryWake => "discovery_wake",
            FallbackStrategy::Reauth => "reauth",
            FallbackStrategy::ForcedTransfer => "forced_transfer",
            FallbackStrategy::TerminalFailure => "terminal_failure",
        }
    }

    /// 1-based position in the sequence
    pub fn ordinal(&self) -> u8 {
        match self {
            FallbackStrategy::QuickRecheck => 1,
            FallbackStrategy::IpWake => 2,
            FallbackStrategy::DiscoveryWake => 3,
            FallbackStrategy::Reauth => 4,
            FallbackStrategy::ForcedTransfer => 5,
            FallbackStrategy::TerminalFailure => 6,
        }
    }

    fn bit(&self) -> u8 {
        match self {
            FallbackStrategy::TerminalFailure => 0,
            other => 1 << (other.ordinal() - 1),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::CONFIGURABLE
            .into_iter()
            .find(|s| s.name() == name.trim())
    }
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of enabled fallback strategies
///
/// Accepts a preset name (`"both"`, `"local_wake"`, `"forced_transfer"`,
/// `"recheck_only"`) or a list of strategy names. Unknown names are rejected
/// when the configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyRepr", into = "PolicyRepr")]
pub struct FallbackPolicy(u8);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PolicyRepr {
    Preset(String),
    List(Vec<String>),
}

impl FallbackPolicy {
    pub const QUICK_RECHECK: u8 = 1 << 0;
    pub const IP_WAKE: u8 = 1 << 1;
    pub const DISCOVERY_WAKE: u8 = 1 << 2;
    pub const REAUTH: u8 = 1 << 3;
    pub const FORCED_TRANSFER: u8 = 1 << 4;
    const ALL: u8 = 0b1_1111;

    /// Local wake strategies and forced transfer
    pub fn both() -> Self {
        Self(Self::ALL)
    }

    pub fn local_wake() -> Self {
        Self(Self::QUICK_RECHECK | Self::IP_WAKE | Self::DISCOVERY_WAKE | Self::REAUTH)
    }

    pub fn forced_transfer() -> Self {
        Self(Self::QUICK_RECHECK | Self::FORCED_TRANSFER)
    }

    pub fn recheck_only() -> Self {
        Self(Self::QUICK_RECHECK)
    }

    pub fn from_bits(bits: u8) -> Result<Self, ConfigError> {
        if bits & !Self::ALL != 0 {
            return Err(ConfigError::Invalid(format!(
                "unknown fallback strategy bits {:#07b}",
                bits
            )));
        }
        Ok(Self(bits))
    }

    pub fn from_preset(preset: &str) -> Result<Self, ConfigError> {
        match preset.trim() {
            "both" | "all" => Ok(Self::both()),
            "local_wake" => Ok(Self::local_wake()),
            "forced_transfer" => Ok(Self::forced_transfer()),
            "recheck_only" | "none" => Ok(Self::recheck_only()),
            other => match FallbackStrategy::from_name(other) {
                Some(strategy) => Ok(Self(strategy.bit())),
                None => Err(ConfigError::Invalid(format!(
                    "unknown fallback policy '{}'",
                    other
                ))),
            },
        }
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn enables(&self, strategy: FallbackStrategy) -> bool {
        strategy == FallbackStrategy::TerminalFailure || self.0 & strategy.bit() != 0
    }

    /// Enabled strategies in execution order, ending with terminal failure
    pub fn sequence(&self) -> Vec<FallbackStrategy> {
        FallbackStrategy::CONFIGURABLE
            .into_iter()
            .filter(|s| self.enables(*s))
            .chain(std::iter::once(FallbackStrategy::TerminalFailure))
            .collect()
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::both()
    }
}

impl TryFrom<PolicyRepr> for FallbackPolicy {
    type Error = ConfigError;

    fn try_from(repr: PolicyRepr) -> Result<Self, Self::Error> {
        match repr {
            PolicyRepr::Preset(preset) => Self::from_preset(&preset),
            PolicyRepr::List(names) => {
                let mut bits = 0u8;
                for name in names {
                    let strategy = FallbackStrategy::from_name(&name).ok_or_else(|| {
                        ConfigError::Invalid(format!("unknown fallback strategy '{}'", name))
                    })?;
                    bits |= strategy.bit();
                }
                Self::from_bits(bits)
            }
        }
    }
}

impl From<FallbackPolicy> for PolicyRepr {
    fn from(policy: FallbackPolicy) -> Self {
        PolicyRepr::List(
            FallbackStrategy::CONFIGURABLE
                .into_iter()
                .filter(|s| policy.enables(*s))
                .map(|s| s.name().to_string())
                .collect(),
        )
    }
}

/// What a receiver supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Answers getInfo/addUser on its zeroconf endpoint
    pub local_wake: bool,
    /// Worth discovering ahead of the deadline
    pub prewarm: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            local_wake: true,
            prewarm: true,
        }
    }
}

fn default_volume() -> u8 {
    35
}

fn default_max_wake_wait() -> Duration {
    Duration::from_secs(22)
}

/// A configured receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Name the user knows the device by
    pub name: String,
    /// mDNS instance name, when different
    #[serde(default)]
    pub instance_name: Option<String>,
    /// Names the cloud API has listed this device under
    #[serde(default)]
    pub cloud_names: Vec<String>,
    #[serde(default)]
    pub cloud_device_id: Option<String>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub cpath: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,
    /// Longest acceptable wait for the device after the deadline
    #[serde(default = "default_max_wake_wait", with = "secs")]
    pub max_wake_wait: Duration,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_name: None,
            cloud_names: Vec::new(),
            cloud_device_id: None,
            ip: None,
            port: None,
            cpath: None,
            volume: default_volume(),
            auth_mode: AuthMode::default(),
            capabilities: Capabilities::default(),
            fallback_policy: FallbackPolicy::default(),
            max_wake_wait: default_max_wake_wait(),
        }
    }

    pub fn with_address(mut self, ip: IpAddr, port: u16, cpath: Option<&str>) -> Self {
        self.ip = Some(ip);
        self.port = Some(port);
        self.cpath = cpath.map(str::to_string);
        self
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    pub fn with_cloud_device_id(mut self, id: impl Into<String>) -> Self {
        self.cloud_device_id = Some(id.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Key used for the circuit breaker and caches
    pub fn key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Statically known zeroconf endpoint
    pub fn known_address(&self) -> Option<DeviceAddress> {
        Some(DeviceAddress::new(self.ip?, self.port?, self.cpath.as_deref()))
    }

    /// Every name this device may appear under, configured name first
    pub fn all_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![self.name.as_str()];
        if let Some(instance) = &self.instance_name {
            names.push(instance.as_str());
        }
        names.extend(self.cloud_names.iter().map(String::as_str));
        names
    }

    /// Exact (case-insensitive) name match or known cloud id
    pub fn matches_cloud_device(&self, device: &CloudDevice) -> bool {
        if let (Some(known), Some(id)) = (&self.cloud_device_id, &device.id) {
            if known == id {
                return true;
            }
        }
        let name = device.name.trim();
        self.all_names()
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(name))
    }

    /// Merge what a run learned; returns whether anything changed
    pub fn apply(&mut self, update: &ProfileUpdate) -> bool {
        let mut changed = false;
        for name in &update.learned_names {
            let known = self
                .all_names()
                .iter()
                .any(|n| n.trim().eq_ignore_ascii_case(name.trim()));
            if !known && !name.trim().is_empty() {
                self.cloud_names.push(name.trim().to_string());
                changed = true;
            }
        }
        if let Some(id) = &update.cloud_device_id {
            if self.cloud_device_id.as_ref() != Some(id) {
                self.cloud_device_id = Some(id.clone());
                changed = true;
            }
        }
        if let Some(address) = &update.address {
            if self.known_address().as_ref() != Some(address) {
                self.ip = Some(address.ip);
                self.port = Some(address.port);
                self.cpath = Some(address.cpath.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn validate(&self, has_blob_credentials: bool) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("device name must not be empty".to_string()));
        }
        if self.volume > 100 {
            return Err(ConfigError::Invalid(format!(
                "volume for '{}' must be 0-100, got {}",
                self.name, self.volume
            )));
        }
        if self.ip.is_some() != self.port.is_some() {
            return Err(ConfigError::Invalid(format!(
                "device '{}' needs both ip and port, or neither",
                self.name
            )));
        }
        if self.auth_mode == AuthMode::BlobClientKey && !has_blob_credentials {
            return Err(ConfigError::Missing(format!(
                "blob_credentials (device '{}' uses blob_client_key)",
                self.name
            )));
        }
        if self.max_wake_wait.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "max_wake_wait for '{}' must be greater than 0",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// Whole-process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(default)]
    pub credentials: ClientCredentials,
    /// Only needed for devices using the blob auth mode
    #[serde(default)]
    pub blob_credentials: Option<AddUserCredentials>,
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub default_context_uri: Option<String>,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default = "default_true")]
    pub prewarm_enabled: bool,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            credentials: ClientCredentials::default(),
            blob_credentials: None,
            devices: Vec::new(),
            timings: Timings::default(),
            default_context_uri: None,
            shuffle: false,
            prewarm_enabled: true,
            api_base_url: None,
            token_url: None,
        }
    }
}

impl AlarmConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a JSON file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&json)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    ///
    /// Recognised: `SPOTIFY_CLIENT_ID`, `SPOTIFY_CLIENT_SECRET`,
    /// `SPOTIFY_REFRESH_TOKEN`, `ALARM_CONTEXT_URI`, `ALARM_PREWARM_S`,
    /// `ALARM_PREWARM_ENABLED`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = non_empty("SPOTIFY_CLIENT_ID") {
            self.credentials.client_id = value;
        }
        if let Some(value) = non_empty("SPOTIFY_CLIENT_SECRET") {
            self.credentials.client_secret = value;
        }
        if let Some(value) = non_empty("SPOTIFY_REFRESH_TOKEN") {
            self.credentials.refresh_token = value;
        }
        if let Some(value) = non_empty("ALARM_CONTEXT_URI") {
            self.default_context_uri = Some(value);
        }
        if let Some(value) = non_empty("ALARM_PREWARM_S") {
            let secs: u64 = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("ALARM_PREWARM_S must be whole seconds, got '{}'", value))
            })?;
            self.timings.prewarm_offset = Duration::from_secs(secs);
        }
        if let Some(value) = non_empty("ALARM_PREWARM_ENABLED") {
            self.prewarm_enabled = value.trim().eq_ignore_ascii_case("true") || value.trim() == "1";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = self.credentials.missing_fields();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(format!(
                "spotify credentials: {}",
                missing.join(", ")
            )));
        }

        self.timings.validate()?;

        if let Some(uri) = &self.default_context_uri {
            validate_context_uri(uri)?;
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            device.validate(self.blob_credentials.is_some())?;
            if !seen.insert(device.key()) {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' is configured more than once",
                    device.name
                )));
            }
        }

        if let Some(blob) = &self.blob_credentials {
            blob.payload(AuthMode::BlobClientKey)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceProfile> {
        let key = name.trim().to_lowercase();
        self.devices.iter().find(|d| d.key() == key)
    }
}

/// Context URIs are `spotify:<type>:<id>`
pub fn validate_context_uri(uri: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = uri.split(':').collect();
    if parts.len() >= 3 && parts[0] == "spotify" && parts.iter().all(|p| !p.is_empty()) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("'{}' is not a Spotify context URI", uri)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn valid_config() -> AlarmConfig {
        AlarmConfig {
            credentials: ClientCredentials::new("id", "secret", "refresh"),
            devices: vec![DeviceProfile::new("Living Room")],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();
        assert_eq!(timings.prewarm_offset, Duration::from_secs(60));
        assert_eq!(timings.total_poll_deadline, Duration::from_secs(20));
        assert_eq!(timings.poll_deadline_extension, Duration::from_secs(15));
        assert_eq!(timings.debounce_after_seen, Duration::from_millis(600));
        assert_eq!(timings.retry_404_delay, Duration::from_millis(700));
        assert_eq!(timings.failover_fire_after, Duration::from_secs(2));
        assert_eq!(timings.run_bound(), Duration::from_secs(75));
        assert!(timings.validate().is_ok());
    }

    #[test]
    fn test_timing_presets_and_builders() {
        assert!(Timings::slow_receivers().validate().is_ok());

        let timings = Timings::new()
            .with_prewarm_offset(Duration::from_secs(90))
            .with_poll_deadline(Duration::from_secs(30), Duration::from_secs(10))
            .with_failover(Duration::from_secs(50), Duration::from_secs(20));
        assert_eq!(timings.total_poll_deadline, Duration::from_secs(30));
        assert!(timings.validate().is_ok());
    }

    #[test]
    fn test_timing_validation() {
        let invalid = Timings {
            prewarm_offset: Duration::from_secs(5),
            getinfo_offset: Duration::from_secs(5),
            adduser_offset: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let inverted = Timings {
            poll_sleep_fast: Duration::from_secs(2),
            poll_sleep_slow: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let short_threshold = Timings {
            failover_threshold: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(short_threshold.validate().is_err());
    }

    #[test]
    fn test_timings_deserialize_partial_seconds() {
        let timings: Timings =
            serde_json::from_str(r#"{"debounce_after_seen": 1.2, "token_refresh_every": 3}"#).unwrap();
        assert_eq!(timings.debounce_after_seen, Duration::from_millis(1200));
        assert_eq!(timings.token_refresh_every, 3);
        assert_eq!(timings.prewarm_offset, Duration::from_secs(60));

        assert!(serde_json::from_str::<Timings>(r#"{"getinfo_timeout": -1}"#).is_err());
    }

    #[rstest]
    #[case(r#"{"timings": {"getinfo_timeout": 1e300}}"#)]
    #[case(r#"{"timings": {"fallback_budget": -0.5}}"#)]
    fn test_out_of_range_duration_is_a_config_error(#[case] json: &str) {
        let err = AlarmConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref msg) if msg.contains("non-negative number of seconds")));
    }

    #[rstest]
    #[case(r#""both""#, FallbackPolicy::both())]
    #[case(r#""local_wake""#, FallbackPolicy::local_wake())]
    #[case(r#""forced_transfer""#, FallbackPolicy::forced_transfer())]
    #[case(r#""none""#, FallbackPolicy::recheck_only())]
    #[case(r#"["reauth","quick_recheck"]"#, FallbackPolicy::from_bits(FallbackPolicy::REAUTH | FallbackPolicy::QUICK_RECHECK).unwrap())]
    fn test_fallback_policy_parsing(#[case] json: &str, #[case] expected: FallbackPolicy) {
        let policy: FallbackPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy, expected);
    }

    #[test]
    fn test_fallback_policy_rejects_unknown() {
        assert!(serde_json::from_str::<FallbackPolicy>(r#""sometimes""#).is_err());
        assert!(serde_json::from_str::<FallbackPolicy>(r#"["reauth","teleport"]"#).is_err());
        assert!(FallbackPolicy::from_bits(0b10_0000).is_err());
    }

    #[test]
    fn test_fallback_sequence_order() {
        let sequence = FallbackPolicy::both().sequence();
        assert_eq!(sequence.len(), 6);
        assert_eq!(sequence[0], FallbackStrategy::QuickRecheck);
        assert_eq!(sequence[3], FallbackStrategy::Reauth);
        assert_eq!(sequence[5], FallbackStrategy::TerminalFailure);

        let forced = FallbackPolicy::forced_transfer().sequence();
        assert_eq!(
            forced,
            vec![
                FallbackStrategy::QuickRecheck,
                FallbackStrategy::ForcedTransfer,
                FallbackStrategy::TerminalFailure
            ]
        );
    }

    #[test]
    fn test_fallback_policy_serializes_as_list() {
        let json = serde_json::to_string(&FallbackPolicy::forced_transfer()).unwrap();
        assert_eq!(json, r#"["quick_recheck","forced_transfer"]"#);
    }

    #[test]
    fn test_device_profile_defaults() {
        let profile: DeviceProfile = serde_json::from_str(r#"{"name":"Kitchen"}"#).unwrap();
        assert_eq!(profile.volume, 35);
        assert_eq!(profile.auth_mode, AuthMode::AccessToken);
        assert_eq!(profile.fallback_policy, FallbackPolicy::both());
        assert_eq!(profile.max_wake_wait, Duration::from_secs(22));
        assert!(profile.capabilities.local_wake);
        assert!(profile.known_address().is_none());
    }

    #[test]
    fn test_profile_apply_update() {
        let mut profile = DeviceProfile::new("Living Room");
        let update = ProfileUpdate {
            learned_names: vec!["living room".into(), "Denon AVR".into()],
            cloud_device_id: Some("dev-1".into()),
            address: Some(DeviceAddress::new("10.0.0.9".parse().unwrap(), 4070, None)),
        };
        assert!(profile.apply(&update));
        assert_eq!(profile.cloud_names, vec!["Denon AVR"]);
        assert_eq!(profile.cloud_device_id.as_deref(), Some("dev-1"));
        assert_eq!(profile.port, Some(4070));
        assert!(!profile.apply(&update));
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());

        let mut missing = valid_config();
        missing.credentials.client_secret.clear();
        assert!(matches!(missing.validate(), Err(ConfigError::Missing(_))));

        let mut loud = valid_config();
        loud.devices[0].volume = 101;
        assert!(loud.validate().is_err());

        let mut duplicate = valid_config();
        duplicate.devices.push(DeviceProfile::new("living room"));
        assert!(duplicate.validate().is_err());

        let mut blob = valid_config();
        blob.devices[0].auth_mode = AuthMode::BlobClientKey;
        assert!(matches!(blob.validate(), Err(ConfigError::Missing(_))));
        blob.blob_credentials = Some(AddUserCredentials::blob("u", "b", "k"));
        assert!(blob.validate().is_ok());

        let mut bad_uri = valid_config();
        bad_uri.default_context_uri = Some("https://open.spotify.com/playlist/1".into());
        assert!(bad_uri.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SPOTIFY_CLIENT_ID", "env-id"),
            ("ALARM_CONTEXT_URI", "spotify:playlist:abc"),
            ("ALARM_PREWARM_S", "90"),
            ("ALARM_PREWARM_ENABLED", "false"),
            ("SPOTIFY_CLIENT_SECRET", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.credentials.client_id, "env-id");
        assert_eq!(config.credentials.client_secret, "secret");
        assert_eq!(config.default_context_uri.as_deref(), Some("spotify:playlist:abc"));
        assert_eq!(config.timings.prewarm_offset, Duration::from_secs(90));
        assert!(!config.prewarm_enabled);

        let mut bad = valid_config();
        assert!(bad
            .apply_env_from(|key| (key == "ALARM_PREWARM_S").then(|| "soon".to_string()))
            .is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config = AlarmConfig::from_json(
            r#"{
                "credentials": {"client_id": "a", "client_secret": "b", "refresh_token": "c"},
                "devices": [{"name": "Bedroom", "ip": "192.168.1.20", "port": 4070, "fallback_policy": "local_wake"}],
                "timings": {"total_poll_deadline": 25}
            }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        let bedroom = config.device("bedroom").unwrap();
        assert_eq!(bedroom.fallback_policy, FallbackPolicy::local_wake());
        assert_eq!(
            bedroom.known_address().unwrap().cpath,
            zeroconf_client::DEFAULT_CPATH
        );
        assert_eq!(config.timings.total_poll_deadline, Duration::from_secs(25));
        assert!(config.prewarm_enabled);
    }
}
