//! Periodic upkeep between alarms
//!
//! Two loops run while the system is up:
//!
//! - discovery refresh: browse mDNS and keep the address cache warm for every
//!   configured device, so a run can skip its own discovery
//! - cloud presence: re-register devices that dropped off the cloud device
//!   list, so they are visible when the next alarm fires
//!
//! Both stop on a shared shutdown signal and are joined by
//! [`crate::AlarmSystem::shutdown`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alarm_playback::DeviceProfile;
use connect_discovery::{best_match, MatchKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use zeroconf_client::{AddUserCredentials, AuthMode};

use crate::system::Shared;

pub const DISCOVERY_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(60);

/// How often each background loop ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundIntervals {
    pub discovery_refresh: Duration,
    pub presence: Duration,
}

impl Default for BackgroundIntervals {
    fn default() -> Self {
        Self {
            discovery_refresh: DISCOVERY_REFRESH_INTERVAL,
            presence: PRESENCE_INTERVAL,
        }
    }
}

pub(crate) struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(shared: Arc<Shared>, intervals: BackgroundIntervals) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let refresh = {
            let shared = Arc::clone(&shared);
            spawn_periodic(
                "discovery_refresh",
                intervals.discovery_refresh,
                shutdown_rx.clone(),
                move || refresh_discovery(Arc::clone(&shared)),
            )
        };
        let presence = spawn_periodic(
            "cloud_presence",
            intervals.presence,
            shutdown_rx,
            move || keep_present(Arc::clone(&shared)),
        );

        Self {
            shutdown_tx,
            handles: vec![refresh, presence],
        }
    }

    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

fn spawn_periodic<F, Fut>(
    task: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task, period_ms = period.as_millis() as u64, "Background task started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
            // A tick in flight is abandoned on shutdown
            tokio::select! {
                _ = tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!(task, "Shutdown interrupted a running tick");
                    break;
                }
            }
        }

        debug!(task, "Background task stopped");
    })
}

/// Browse once and cache an address for every configured device found
pub(crate) async fn refresh_discovery(shared: Arc<Shared>) {
    let results = match shared
        .discovery
        .discover_all(shared.timings.mdns_discovery_timeout)
        .await
    {
        Ok(results) => results,
        Err(e) => {
            warn!(error = %e, "Background discovery failed");
            return;
        }
    };

    let mut matched = 0;
    for profile in shared.profile_list() {
        let hit = profile
            .all_names()
            .into_iter()
            .find_map(|name| {
                best_match(name, &results).filter(|hit| hit.matches(name) == Some(MatchKind::Exact))
            });
        if let Some(hit) = hit {
            shared.cache.insert_as(&profile.name, hit);
            matched += 1;
        }
    }

    let purged = shared.cache.purge_expired();
    debug!(found = results.len(), matched, purged, "Discovery cache refreshed");
}

/// Re-register local-wake devices that are missing from the cloud list
pub(crate) async fn keep_present(shared: Arc<Shared>) {
    let candidates: Vec<DeviceProfile> = shared
        .profile_list()
        .into_iter()
        .filter(|p| p.capabilities.local_wake && !shared.in_flight.contains_key(&p.key()))
        .collect();
    if candidates.is_empty() {
        return;
    }

    let call_timeout = shared.timings.api_call_timeout;
    let listed = match timeout(call_timeout, shared.api.list_devices()).await {
        Ok(Ok(devices)) => devices,
        Ok(Err(e)) => {
            warn!(error = %e, "Presence check could not list devices");
            return;
        }
        Err(_) => {
            warn!("Presence check timed out listing devices");
            return;
        }
    };

    for profile in candidates {
        if listed.iter().any(|d| profile.matches_cloud_device(d)) {
            continue;
        }

        let address = shared
            .cache
            .get_fresh(&profile.name)
            .map(|r| r.address)
            .or_else(|| profile.known_address());
        let Some(address) = address else {
            debug!(device = %profile.name, "Not listed and no known address, skipping");
            continue;
        };

        if let Err(e) = shared
            .zeroconf
            .get_info(&address, shared.timings.getinfo_timeout)
            .await
        {
            debug!(device = %profile.name, %address, error = %e, "Presence getInfo failed");
            continue;
        }

        let credentials = match profile.auth_mode {
            AuthMode::AccessToken => {
                match timeout(call_timeout, shared.api.access_token()).await {
                    Ok(Ok(token)) => AddUserCredentials::access_token(token),
                    Ok(Err(e)) => {
                        warn!(error = %e, "Presence check could not get an access token");
                        return;
                    }
                    Err(_) => {
                        warn!("Presence check timed out getting an access token");
                        return;
                    }
                }
            }
            AuthMode::BlobClientKey => match &shared.blob_credentials {
                Some(blob) => blob.clone(),
                None => continue,
            },
        };

        match shared
            .zeroconf
            .add_user(
                &address,
                &credentials,
                profile.auth_mode,
                shared.timings.adduser_timeout,
            )
            .await
        {
            Ok(()) => info!(device = %profile.name, %address, "Re-registered device missing from cloud list"),
            Err(e) => debug!(device = %profile.name, %address, error = %e, "Presence addUser failed"),
        }
    }
}
