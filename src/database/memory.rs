use std::collections::HashMap;

use chrono::NaiveDate;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::{
    config::window_bounds,
    database::{
        db_structs::{ConfigSummary, RawConfig, RawMatch},
        CacheStore, MatchRepository, RepositoryError
    },
    model::structures::snapshot::CacheSnapshot
};

/// A process-local store implementing both [`MatchRepository`] and [`CacheStore`].
///
/// Matches are returned in insertion order.
#[derive(Default)]
pub struct InMemoryStore {
    configs: RwLock<IndexMap<String, (RawConfig, bool)>>,
    matches: RwLock<Vec<RawMatch>>,
    snapshots: RwLock<HashMap<String, CacheSnapshot>>
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `config` under its own `config_hash`.
    ///
    /// Storing the same rules again updates the name, description and official
    /// flag. Different rules under an existing hash are refused.
    pub async fn insert_config(&self, config: RawConfig, is_official: bool) -> Result<(), RepositoryError> {
        let mut configs = self.configs.write().await;

        if let Some((existing, _)) = configs.get(&config.config_hash) {
            if existing.config_data != config.config_data {
                return Err(RepositoryError::ConfigConflict(config.config_hash));
            }
        }

        configs.insert(config.config_hash.clone(), (config, is_official));
        Ok(())
    }

    pub async fn insert_matches(&self, matches: impl IntoIterator<Item = RawMatch>) {
        self.matches.write().await.extend(matches);
    }

    /// Replaces the whole match log.
    pub async fn set_matches(&self, matches: Vec<RawMatch>) {
        *self.matches.write().await = matches;
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

impl MatchRepository for InMemoryStore {
    async fn get_config(&self, config_hash: &str) -> Result<Option<RawConfig>, RepositoryError> {
        Ok(self.configs.read().await.get(config_hash).map(|(raw, _)| raw.clone()))
    }

    async fn list_matches(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawMatch>, RepositoryError> {
        let (lower, upper) = window_bounds(start, end);

        Ok(self
            .matches
            .read()
            .await
            .iter()
            .filter(|m| lower <= m.started_at && m.started_at < upper)
            .cloned()
            .collect())
    }

    async fn list_configs(&self) -> Result<Vec<ConfigSummary>, RepositoryError> {
        Ok(self
            .configs
            .read()
            .await
            .values()
            .map(|(raw, is_official)| ConfigSummary {
                config_hash: raw.config_hash.clone(),
                name: raw.name.clone(),
                description: raw.description.clone(),
                is_official: *is_official
            })
            .collect())
    }
}

impl CacheStore for InMemoryStore {
    async fn read_source_hash(&self, config_hash: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(config_hash)
            .map(|s| s.source_data_hash.clone()))
    }

    async fn clear(&self, config_hash: &str) -> Result<(), RepositoryError> {
        self.snapshots.write().await.remove(config_hash);
        Ok(())
    }

    async fn write(&self, snapshot: &CacheSnapshot) -> Result<(), RepositoryError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.config_hash.clone(), snapshot.clone());
        Ok(())
    }

    async fn read_snapshot(&self, config_hash: &str) -> Result<Option<CacheSnapshot>, RepositoryError> {
        Ok(self.snapshots.read().await.get(config_hash).cloned())
    }
}
