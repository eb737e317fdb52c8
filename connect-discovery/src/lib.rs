//! Spotify Connect device discovery
//!
//! Receivers announce themselves over mDNS as `_spotify-connect._tcp.local.`
//! with a `CPath` TXT record pointing at their zeroconf endpoint. This crate
//! browses for those announcements, asks each candidate for its names via
//! `getInfo`, and picks the one matching a user-facing device name.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use connect_discovery::{DeviceDiscovery, DiscoveryCache, MdnsDiscovery};
//! use zeroconf_client::ZeroconfClient;
//!
//! # async fn run() -> connect_discovery::Result<()> {
//! let discovery = MdnsDiscovery::new(Arc::new(ZeroconfClient::new()), DiscoveryCache::new());
//! if let Some(found) = discovery.discover(Some("Kitchen"), Duration::from_millis(1500)).await? {
//!     println!("{} at {}", found.primary_name(), found.address);
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod error;
mod mdns;
pub mod names;

pub use cache::{DiscoveryCache, DEFAULT_CACHE_TTL};
pub use error::{DiscoveryError, Result};
pub use mdns::{best_match, Advertisement, MdnsDiscovery};
pub use names::MatchKind;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroconf_client::DeviceAddress;

/// mDNS service type advertised by Spotify Connect receivers
pub const SERVICE_TYPE: &str = "_spotify-connect._tcp.local.";

/// A resolved receiver on the local network
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    /// Zeroconf endpoint (ip, port, connection path)
    pub address: DeviceAddress,
    /// mDNS instance name as advertised
    pub instance_name: String,
    /// Raw TXT record
    pub txt: HashMap<String, String>,
    /// Name candidates, highest priority first
    pub friendly_names: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveryResult {
    /// Best name for display and matching
    pub fn primary_name(&self) -> &str {
        self.friendly_names
            .first()
            .map(String::as_str)
            .unwrap_or(self.instance_name.as_str())
    }

    pub fn matches(&self, hint: &str) -> Option<MatchKind> {
        names::match_hint(hint, &self.friendly_names)
    }
}

/// Local discovery capability used by the orchestrator
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Find the device matching `hint` (or any device when `None`).
    ///
    /// Returns `Ok(None)` when nothing matched before `timeout`.
    async fn discover(&self, hint: Option<&str>, timeout: Duration)
        -> Result<Option<DiscoveryResult>>;

    /// Collect every device that answers within `timeout`.
    async fn discover_all(&self, timeout: Duration) -> Result<Vec<DiscoveryResult>>;
}
