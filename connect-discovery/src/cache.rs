//! Freshness-bounded cache of discovery results
//!
//! Shared between alarm runs and the background refresh task. Reads vastly
//! outnumber writes and a slightly stale read is harmless, so a plain
//! read-write lock is enough.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::DiscoveryResult;

/// Default freshness window for cached results
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
struct CacheEntry {
    result: DiscoveryResult,
    stored_at: Instant,
}

/// Thread-safe discovery cache keyed by lower-cased device name
#[derive(Debug, Clone)]
pub struct DiscoveryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a result under every one of its friendly names.
    pub fn insert(&self, result: &DiscoveryResult) {
        let keys: Vec<String> = result.friendly_names.iter().map(|n| cache_key(n)).collect();
        self.insert_keys(keys, result);
    }

    /// Store a result under an explicit name as well as its friendly names.
    pub fn insert_as(&self, name: &str, result: &DiscoveryResult) {
        let mut keys: Vec<String> = result.friendly_names.iter().map(|n| cache_key(n)).collect();
        keys.push(cache_key(name));
        self.insert_keys(keys, result);
    }

    fn insert_keys(&self, keys: Vec<String>, result: &DiscoveryResult) {
        let stored_at = Instant::now();
        let mut entries = self.entries.write();
        for key in keys.into_iter().filter(|k| !k.is_empty()) {
            entries.insert(
                key,
                CacheEntry {
                    result: result.clone(),
                    stored_at,
                },
            );
        }
    }

    /// Look up a result that is still inside the freshness window.
    pub fn get_fresh(&self, name: &str) -> Option<DiscoveryResult> {
        let entries = self.entries.read();
        let entry = entries.get(&cache_key(name))?;
        if entry.stored_at.elapsed() <= self.ttl {
            Some(entry.result.clone())
        } else {
            None
        }
    }

    /// Look up a result regardless of age; addresses rarely change.
    pub fn get_any(&self, name: &str) -> Option<DiscoveryResult> {
        self.entries
            .read()
            .get(&cache_key(name))
            .map(|entry| entry.result.clone())
    }

    pub fn invalidate(&self, name: &str) {
        self.entries.write().remove(&cache_key(name));
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        before - entries.len()
    }

    /// Fresh entries keyed by name
    pub fn snapshot(&self) -> HashMap<String, DiscoveryResult> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() <= self.ttl)
            .map(|(key, entry)| (key.clone(), entry.result.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use zeroconf_client::DeviceAddress;

    fn result(names: &[&str]) -> DiscoveryResult {
        DiscoveryResult {
            address: DeviceAddress::new("10.0.0.5".parse().unwrap(), 4070, None),
            instance_name: names[0].to_string(),
            txt: HashMap::new(),
            friendly_names: names.iter().map(|n| n.to_string()).collect(),
            discovered_at: chrono::Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = DiscoveryCache::with_ttl(Duration::from_secs(120));
        cache.insert(&result(&["Kitchen", "Kitchen Speaker"]));

        assert!(cache.get_fresh("kitchen").is_some());
        assert!(cache.get_fresh("KITCHEN SPEAKER").is_some());

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(cache.get_fresh("kitchen").is_none());
        assert!(cache.get_any("kitchen").is_some());
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_as_adds_alias() {
        let cache = DiscoveryCache::new();
        cache.insert_as("Bedroom", &result(&["amp-01"]));
        assert!(cache.get_fresh("bedroom").is_some());
        assert_eq!(cache.snapshot().len(), 2);

        cache.invalidate("bedroom");
        assert!(cache.get_fresh("bedroom").is_none());
        assert!(cache.get_fresh("amp-01").is_some());
    }
}
