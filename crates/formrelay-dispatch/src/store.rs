//! In-memory integration config store.

use std::collections::BTreeMap;
use std::sync::Arc;

use formrelay_core::{EventKind, IntegrationConfig};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A config behind its own lock, so health updates for one config never
/// block lookups or deliveries for another.
pub type SharedConfig = Arc<RwLock<IntegrationConfig>>;

/// Configs keyed by id.
///
/// The map lock is only held to look up, insert or remove entries.
#[derive(Debug, Default)]
pub struct ConfigStore {
    configs: RwLock<BTreeMap<Uuid, SharedConfig>>,
}

impl ConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `config`, returning the config it replaced.
    ///
    /// A replaced entry is updated in place so in-flight deliveries still
    /// record their health on the live entry. Health counters are owned by
    /// the store and survive the replacement.
    pub async fn upsert(&self, config: IntegrationConfig) -> Option<IntegrationConfig> {
        let existing = self.configs.read().await.get(&config.id).cloned();
        if let Some(shared) = existing {
            return Some(Self::replace(&shared, config).await);
        }

        let mut configs = self.configs.write().await;
        let raced = configs.get(&config.id).cloned();
        if let Some(shared) = raced {
            drop(configs);
            return Some(Self::replace(&shared, config).await);
        }

        configs.insert(config.id, Arc::new(RwLock::new(config)));
        None
    }

    async fn replace(shared: &SharedConfig, mut config: IntegrationConfig) -> IntegrationConfig {
        let mut current = shared.write().await;
        config.health = current.health.clone();
        std::mem::replace(&mut *current, config)
    }

    /// Removes the config with `id`.
    pub async fn remove(&self, id: Uuid) -> Option<IntegrationConfig> {
        let shared = self.configs.write().await.remove(&id)?;
        let config = shared.read().await.clone();
        Some(config)
    }

    /// Returns the shared entry for `id`.
    pub async fn get(&self, id: Uuid) -> Option<SharedConfig> {
        self.configs.read().await.get(&id).cloned()
    }

    /// Returns a snapshot of the config with `id`.
    pub async fn snapshot(&self, id: Uuid) -> Option<IntegrationConfig> {
        let shared = self.get(id).await?;
        let config = shared.read().await.clone();
        Some(config)
    }

    /// Returns snapshots of every config.
    pub async fn all(&self) -> Vec<IntegrationConfig> {
        let entries = self.entries().await;
        let mut configs = Vec::with_capacity(entries.len());
        for shared in entries {
            configs.push(shared.read().await.clone());
        }
        configs
    }

    /// Returns snapshots of every config of `form_id`, enabled or not.
    pub async fn for_form(&self, form_id: &str) -> Vec<IntegrationConfig> {
        let mut configs = self.all().await;
        configs.retain(|config| config.form_id == form_id);
        configs
    }

    /// Returns the entries that should receive `event` for `form_id`.
    pub async fn matching(&self, form_id: &str, event: EventKind) -> Vec<SharedConfig> {
        let mut matching = Vec::new();
        for shared in self.entries().await {
            if shared.read().await.matches(form_id, event) {
                matching.push(shared);
            }
        }
        matching
    }

    /// Number of stored configs.
    pub async fn len(&self) -> usize {
        self.configs.read().await.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.configs.read().await.is_empty()
    }

    async fn entries(&self) -> Vec<SharedConfig> {
        self.configs.read().await.values().cloned().collect()
    }
}
