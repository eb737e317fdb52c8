//! mDNS browsing backed by `mdns-sd`

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use zeroconf_client::{DeviceAddress, DeviceInfo, ZeroconfApi};

use crate::cache::DiscoveryCache;
use crate::names::{friendly_names, match_hint, txt_value, MatchKind};
use crate::{DeviceDiscovery, DiscoveryError, DiscoveryResult, Result, SERVICE_TYPE};

/// Quiet period that ends a `discover_all` sweep once devices stop arriving
const IDLE_GRACE: Duration = Duration::from_millis(300);

/// A single resolved advertisement before name enrichment
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub instance_name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub txt: HashMap<String, String>,
}

impl Advertisement {
    pub fn from_service_info(info: &ServiceInfo) -> Option<Self> {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        // IPv4 first, then a stable order
        addresses.sort_by_key(|ip| (ip.is_ipv6(), *ip));
        if addresses.is_empty() {
            return None;
        }

        let txt = info
            .get_properties()
            .iter()
            .filter(|prop| !prop.key().is_empty())
            .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
            .collect();

        Some(Self {
            instance_name: instance_from_fullname(info.get_fullname()),
            addresses,
            port: info.get_port(),
            txt,
        })
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        let ip = *self.addresses.first()?;
        Some(DeviceAddress::new(ip, self.port, txt_value(&self.txt, "CPath")))
    }

    /// Combine with an optional `getInfo` response into a full result.
    pub fn into_result(self, info: Option<&DeviceInfo>) -> Option<DiscoveryResult> {
        let address = self.address()?;
        let friendly_names = friendly_names(info, &self.txt, &self.instance_name);
        Some(DiscoveryResult {
            address,
            instance_name: self.instance_name,
            txt: self.txt,
            friendly_names,
            discovered_at: chrono::Utc::now(),
        })
    }
}

fn instance_from_fullname(fullname: &str) -> String {
    let suffix = format!(".{}", SERVICE_TYPE);
    match fullname.strip_suffix(&suffix) {
        Some(instance) => instance.to_string(),
        None => fullname
            .split('.')
            .next()
            .unwrap_or(fullname)
            .to_string(),
    }
}

/// [`DeviceDiscovery`] over multicast DNS
pub struct MdnsDiscovery {
    zeroconf: Arc<dyn ZeroconfApi>,
    cache: DiscoveryCache,
    info_timeout: Duration,
}

impl MdnsDiscovery {
    pub fn new(zeroconf: Arc<dyn ZeroconfApi>, cache: DiscoveryCache) -> Self {
        Self {
            zeroconf,
            cache,
            info_timeout: Duration::from_millis(1500),
        }
    }

    /// Timeout for the `getInfo` call made against each candidate
    pub fn with_info_timeout(mut self, timeout: Duration) -> Self {
        self.info_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    fn start_browse(&self) -> Result<(ServiceDaemon, mdns_sd::Receiver<ServiceEvent>)> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
        match daemon.browse(SERVICE_TYPE) {
            Ok(receiver) => Ok((daemon, receiver)),
            Err(e) => {
                let _ = daemon.shutdown();
                Err(DiscoveryError::Browse {
                    service_type: SERVICE_TYPE,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn stop_browse(daemon: ServiceDaemon) {
        if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
            debug!(error = %e, "mDNS browse did not stop cleanly");
        }
        let _ = daemon.shutdown();
    }

    /// Enrich an advertisement with `getInfo` names, bounded by `deadline`.
    async fn resolve(&self, advertisement: Advertisement, deadline: Instant) -> Option<DiscoveryResult> {
        let address = advertisement.address()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = self.info_timeout.min(remaining.max(Duration::from_millis(250)));

        let info = match self.zeroconf.get_info(&address, budget).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(%address, error = %e, "getInfo during discovery failed, using advertised names");
                None
            }
        };
        advertisement.into_result(info.as_ref())
    }
}

#[async_trait]
impl DeviceDiscovery for MdnsDiscovery {
    async fn discover(
        &self,
        hint: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<DiscoveryResult>> {
        info!(?hint, ?timeout, "starting mDNS discovery");
        let deadline = Instant::now() + timeout;
        let (daemon, receiver) = self.start_browse()?;

        let mut partial: Option<DiscoveryResult> = None;
        let mut ambiguous = false;
        let exact = loop {
            let event = match timeout_at(deadline, receiver.recv_async()).await {
                Ok(Ok(event)) => event,
                Ok(Err(_)) | Err(_) => break None,
            };
            let ServiceEvent::ServiceResolved(service) = event else {
                continue;
            };
            let Some(advertisement) = Advertisement::from_service_info(&service) else {
                continue;
            };
            let Some(result) = self.resolve(advertisement, deadline).await else {
                continue;
            };

            match hint {
                None => break Some(result),
                Some(hint) => match result.matches(hint) {
                    Some(MatchKind::Exact) => break Some(result),
                    Some(MatchKind::Partial) => {
                        match partial.as_ref().map(|first| first.address != result.address) {
                            None => {
                                debug!(name = result.primary_name(), hint, "partial match, waiting for exact");
                                partial = Some(result);
                            }
                            Some(true) => {
                                debug!(name = result.primary_name(), hint, "second partial match, hint is ambiguous");
                                ambiguous = true;
                            }
                            Some(false) => {}
                        }
                    }
                    None => {
                        debug!(name = result.primary_name(), hint, "skipping non-matching device");
                    }
                },
            }
        };
        Self::stop_browse(daemon);

        let partial = if ambiguous { None } else { partial };
        let found = exact.or(partial);
        match (&found, hint) {
            (Some(result), Some(hint)) if result.matches(hint) == Some(MatchKind::Exact) => {
                info!(name = result.primary_name(), address = %result.address, "discovery matched");
                self.cache.insert_as(hint, result);
            }
            (Some(result), Some(hint)) => {
                info!(name = result.primary_name(), address = %result.address, hint, "discovery matched partially");
                self.cache.insert(result);
            }
            (Some(result), None) => {
                info!(name = result.primary_name(), address = %result.address, "discovery found device");
                self.cache.insert(result);
            }
            (None, _) => warn!(?hint, "no matching Spotify Connect device discovered"),
        }
        Ok(found)
    }

    async fn discover_all(&self, timeout: Duration) -> Result<Vec<DiscoveryResult>> {
        let deadline = Instant::now() + timeout;
        let (daemon, receiver) = self.start_browse()?;

        let mut advertisements: Vec<Advertisement> = Vec::new();
        let mut wait_until = deadline;
        loop {
            let event = match timeout_at(wait_until, receiver.recv_async()).await {
                Ok(Ok(event)) => event,
                Ok(Err(_)) | Err(_) => break,
            };
            let ServiceEvent::ServiceResolved(service) = event else {
                continue;
            };
            if let Some(advertisement) = Advertisement::from_service_info(&service) {
                let key = advertisement.instance_name.to_lowercase();
                advertisements.retain(|a| a.instance_name.to_lowercase() != key);
                advertisements.push(advertisement);
                wait_until = deadline.min(Instant::now() + IDLE_GRACE);
            }
        }
        Self::stop_browse(daemon);

        let info_deadline = Instant::now() + self.info_timeout;
        let resolved = futures::future::join_all(
            advertisements
                .into_iter()
                .map(|advertisement| self.resolve(advertisement, info_deadline)),
        )
        .await;

        let mut results: Vec<DiscoveryResult> = resolved.into_iter().flatten().collect();
        results.sort_by_key(|r| r.primary_name().to_lowercase());
        for result in &results {
            self.cache.insert(result);
        }
        info!(count = results.len(), "discovery sweep complete");
        Ok(results)
    }
}

/// Pick the best match for `hint` among already-resolved results.
///
/// An exact name match always wins. A partial match is only accepted when
/// it is the sole device whose names contain the hint.
pub fn best_match<'a>(hint: &str, results: &'a [DiscoveryResult]) -> Option<&'a DiscoveryResult> {
    let mut partial: Option<&DiscoveryResult> = None;
    let mut ambiguous = false;
    for result in results {
        match match_hint(hint, &result.friendly_names) {
            Some(MatchKind::Exact) => return Some(result),
            Some(MatchKind::Partial) => match partial {
                Some(first) if first.address != result.address => ambiguous = true,
                Some(_) => {}
                None => partial = Some(result),
            },
            None => {}
        }
    }
    if ambiguous {
        debug!(hint, "several devices partially match, refusing to guess");
        return None;
    }
    partial
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(instance: &str, txt: &[(&str, &str)]) -> Advertisement {
        Advertisement {
            instance_name: instance.to_string(),
            addresses: vec!["192.168.1.20".parse().unwrap()],
            port: 4070,
            txt: txt.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn test_instance_from_fullname() {
        assert_eq!(
            instance_from_fullname("Living Rm. Amp._spotify-connect._tcp.local."),
            "Living Rm. Amp"
        );
        assert_eq!(instance_from_fullname("Kitchen._other._tcp.local."), "Kitchen");
    }

    #[test]
    fn test_advertisement_uses_cpath_txt() {
        let ad = advertisement("Kitchen", &[("CPath", "zc"), ("VERSION", "1.0")]);
        let address = ad.address().unwrap();
        assert_eq!(address.cpath, "/zc");
        assert_eq!(address.port, 4070);
    }

    #[test]
    fn test_into_result_prefers_remote_name() {
        let info = DeviceInfo {
            remote_name: Some("Kitchen".to_string()),
            ..Default::default()
        };
        let result = advertisement("amp-a1b2c3d4", &[("FriendlyName", "Amp")])
            .into_result(Some(&info))
            .unwrap();
        assert_eq!(result.primary_name(), "Kitchen");
        assert_eq!(result.friendly_names, vec!["Kitchen", "Amp", "amp-a1b2c3d4"]);
    }

    #[test]
    fn test_best_match_prefers_exact() {
        let results = vec![
            advertisement("Kitchen Speaker", &[]).into_result(None).unwrap(),
            advertisement("Kitchen", &[]).into_result(None).unwrap(),
        ];
        let found = best_match("kitchen", &results).unwrap();
        assert_eq!(found.instance_name, "Kitchen");
        assert!(best_match("garage", &results).is_none());
    }

    #[test]
    fn test_best_match_never_picks_a_shorter_name() {
        let mut kitchen = advertisement("Kitchen", &[]);
        kitchen.addresses = vec!["192.168.1.60".parse().unwrap()];
        let results = vec![kitchen.into_result(None).unwrap()];

        assert!(best_match("Kitchen Speaker", &results).is_none());
    }

    #[test]
    fn test_best_match_refuses_ambiguous_partial() {
        let mut upstairs = advertisement("Kitchen Upstairs", &[]);
        upstairs.addresses = vec!["192.168.1.61".parse().unwrap()];
        let results = vec![
            advertisement("Kitchen Downstairs", &[]).into_result(None).unwrap(),
            upstairs.into_result(None).unwrap(),
        ];

        assert!(best_match("kitchen", &results).is_none());
        let found = best_match("upstairs", &results).unwrap();
        assert_eq!(found.instance_name, "Kitchen Upstairs");
    }

    #[test]
    fn test_advertisement_without_address_has_no_result() {
        let mut ad = advertisement("Kitchen", &[]);
        ad.addresses.clear();
        assert!(ad.into_result(None).is_none());
    }
}
