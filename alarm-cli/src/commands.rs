use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use connect_discovery::{DeviceDiscovery, DiscoveryCache, MdnsDiscovery};
use serde_json::json;
use tracing::info;
use wakeify::{AlarmConfig, AlarmSystem};
use zeroconf_client::{AddUserCredentials, AuthMode, DeviceAddress, ZeroconfApi, ZeroconfClient};

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn browse_timeout(config: &AlarmConfig, secs: Option<f64>) -> Result<Duration> {
    match secs {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| anyhow!("timeout must be a non-negative number of seconds")),
        None => Ok(config.timings.mdns_discovery_timeout),
    }
}

/// Discovery stack without a cloud client, for local-only commands
fn local_clients(config: &AlarmConfig) -> (Arc<ZeroconfClient>, MdnsDiscovery) {
    let zeroconf = Arc::new(ZeroconfClient::new());
    let discovery = MdnsDiscovery::new(zeroconf.clone(), DiscoveryCache::new())
        .with_info_timeout(config.timings.getinfo_timeout);
    (zeroconf, discovery)
}

/// Configured address first, then mDNS
async fn resolve(
    config: &AlarmConfig,
    discovery: &dyn DeviceDiscovery,
    name: &str,
) -> Result<DeviceAddress> {
    if let Some(address) = config.device(name).and_then(|p| p.known_address()) {
        return Ok(address);
    }
    let found = discovery
        .discover(Some(name), config.timings.mdns_discovery_timeout)
        .await?
        .ok_or_else(|| anyhow!("'{}' not found on the local network", name))?;
    Ok(found.address)
}

pub async fn discover(config: &AlarmConfig, name: &str, timeout: Option<f64>) -> Result<()> {
    let (_, discovery) = local_clients(config);
    let timeout = browse_timeout(config, timeout)?;

    match discovery.discover(Some(name), timeout).await? {
        Some(found) => print_json(&found),
        None => bail!("'{}' not found within {:.1}s", name, timeout.as_secs_f64()),
    }
}

pub async fn discover_all(config: &AlarmConfig, timeout: Option<f64>) -> Result<()> {
    let (_, discovery) = local_clients(config);
    let timeout = browse_timeout(config, timeout)?;

    let found = discovery.discover_all(timeout).await?;
    if found.is_empty() {
        println!("No Spotify Connect devices found");
        return Ok(());
    }
    for result in &found {
        println!(
            "{:<30} {:<22} {}",
            result.primary_name(),
            format!("{}:{}", result.address.ip, result.address.port),
            result.friendly_names.join(", ")
        );
    }
    Ok(())
}

pub async fn touch(config: &AlarmConfig, name: &str) -> Result<()> {
    let (zeroconf, discovery) = local_clients(config);
    let address = resolve(config, &discovery, name).await?;

    let health = zeroconf.health(&address, config.timings.getinfo_timeout).await;
    let info = zeroconf
        .get_info(&address, config.timings.getinfo_timeout)
        .await
        .with_context(|| format!("getInfo failed at {}", address))?;
    let names = info.name_candidates();

    print_json(&json!({
        "address": address,
        "health": health,
        "info": info,
        "names": names,
    }))
}

pub async fn add_user(config: AlarmConfig, name: &str, mode: Option<AuthMode>) -> Result<()> {
    let mode = mode
        .or_else(|| config.device(name).map(|p| p.auth_mode))
        .unwrap_or_default();
    let system = AlarmSystem::from_config(config.clone())?;
    let address = resolve(&config, system.discovery().as_ref(), name).await?;

    let credentials = match mode {
        AuthMode::AccessToken => AddUserCredentials::access_token(
            system
                .api()
                .refresh_token()
                .await
                .context("Could not get an access token")?,
        ),
        AuthMode::BlobClientKey => system
            .blob_credentials()
            .cloned()
            .ok_or_else(|| anyhow!("blob_client_key mode needs blob_credentials in the config"))?,
    };

    system
        .zeroconf()
        .add_user(&address, &credentials, mode, config.timings.adduser_timeout)
        .await
        .with_context(|| format!("addUser failed at {}", address))?;
    info!(device = name, %address, %mode, "addUser accepted");
    println!("addUser accepted by {} ({})", name, address);
    Ok(())
}

pub async fn devices(config: AlarmConfig) -> Result<()> {
    let system = AlarmSystem::from_config(config)?;
    let devices = system.api().list_devices().await?;

    if devices.is_empty() {
        println!("No devices registered with the account");
        return Ok(());
    }
    for device in &devices {
        println!(
            "{:<30} {:<14} {:<42} {}",
            device.name,
            device.device_type,
            device.id.as_deref().unwrap_or("-"),
            if device.is_active { "active" } else { "" }
        );
    }
    Ok(())
}

pub async fn play(
    config: AlarmConfig,
    name: &str,
    context: Option<&str>,
    in_secs: u64,
    shuffle: bool,
) -> Result<()> {
    let system = AlarmSystem::from_config(config)?;
    let deadline = Utc::now() + chrono::Duration::seconds(in_secs as i64);
    let shuffle = shuffle.then_some(true);

    let metrics = system.run_alarm(name, context, shuffle, deadline).await?;
    print_json(&metrics)?;

    if !metrics.success {
        bail!(
            "{}",
            metrics
                .diagnostic
                .unwrap_or_else(|| "alarm run failed".to_string())
        );
    }
    Ok(())
}

pub async fn status(config: AlarmConfig, name: &str) -> Result<()> {
    let system = AlarmSystem::from_config(config)?;
    let status = system.device_status(name).await?;
    print_json(&status)
}

pub async fn stop(config: AlarmConfig, name: &str) -> Result<()> {
    let system = AlarmSystem::from_config(config)?;
    system.stop_playback(name).await?;
    println!("Paused {}", name);
    Ok(())
}
