//! Persistence seam for device profiles
//!
//! Runs learn names, cloud ids and addresses. The system merges those into its
//! registry and hands the updated profile to a [`ProfileStore`].

use std::collections::HashMap;

use alarm_playback::DeviceProfile;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Every stored profile
    async fn load_all(&self) -> Result<Vec<DeviceProfile>>;

    /// Insert or replace the profile under its key
    async fn save(&self, profile: &DeviceProfile) -> Result<()>;
}

/// Process-local store, the default when nothing else is configured
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, DeviceProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = DeviceProfile>) -> Self {
        let store = Self::new();
        {
            let mut map = store.profiles.write();
            for profile in profiles {
                map.insert(profile.key(), profile);
            }
        }
        store
    }

    pub fn get(&self, name: &str) -> Option<DeviceProfile> {
        self.profiles.read().get(&name.trim().to_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn load_all(&self) -> Result<Vec<DeviceProfile>> {
        Ok(self.profiles.read().values().cloned().collect())
    }

    async fn save(&self, profile: &DeviceProfile) -> Result<()> {
        self.profiles.write().insert(profile.key(), profile.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_replaces_by_case_insensitive_key() {
        let store = InMemoryProfileStore::new();
        store.save(&DeviceProfile::new("Kitchen")).await.unwrap();
        store
            .save(&DeviceProfile::new("kitchen ").with_volume(60))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("KITCHEN").unwrap().volume, 60);
    }

    #[tokio::test]
    async fn load_all_returns_seeded_profiles() {
        let store = InMemoryProfileStore::with_profiles([
            DeviceProfile::new("Kitchen"),
            DeviceProfile::new("Bedroom"),
        ]);

        let mut names: Vec<_> = store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Bedroom", "Kitchen"]);
    }
}
