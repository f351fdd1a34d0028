//! Materialization orchestration.
//!
//! A run loads and validates a configuration, loads the finished matches in its
//! window, hashes them, and either reports a cache hit or replays every match
//! through the rating model and replaces the cached snapshot.

pub mod locks;
pub mod selection;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::{validate_and_hash, ConfigError, MaterializationConfig},
    database::{db_structs::RawMatch, CacheStore, MatchRepository, RepositoryError},
    model::{
        rating_model::RatingModel,
        replay_model::replay,
        source_hash::{hash_matches, sort_matches},
        structures::{match_record::Match, snapshot::CacheSnapshot, stage::Stage}
    },
    utils::hash_utils::short_hash
};
use locks::KeyedLocks;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializationSummary {
    pub config_hash: String,
    pub participant_count: usize,
    pub match_count: usize,
    /// Matches dropped because they were malformed
    pub skipped_matches: usize,
    pub source_data_hash: String
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MaterializationOutcome {
    CacheHit {
        config_hash: String,
        source_data_hash: String
    },
    Materialized(MaterializationSummary)
}

#[derive(Debug, Error)]
pub enum MaterializationError {
    #[error("configuration {config_hash} is invalid: {source}")]
    InvalidConfig {
        config_hash: String,
        #[source]
        source: ConfigError
    },
    #[error("configuration not found: {0}")]
    ConfigNotFound(String),
    #[error("{stage} failed: {source}")]
    Repository {
        stage: Stage,
        #[source]
        source: RepositoryError
    },
    #[error("could not hash match data: {0}")]
    SourceHash(#[source] serde_json::Error),
    #[error("materialization of {config_hash} timed out after {after:?}")]
    TimedOut { config_hash: String, after: Duration }
}

impl MaterializationError {
    /// Stable identifier for callers and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            MaterializationError::InvalidConfig { .. } => "invalid_config",
            MaterializationError::ConfigNotFound(_) => "config_not_found",
            MaterializationError::Repository { .. } => "repository",
            MaterializationError::SourceHash(_) => "internal",
            MaterializationError::TimedOut { .. } => "timeout"
        }
    }

    /// Repository failures and timeouts may succeed on a later attempt.
    /// A timed out run should be retried with `force_refresh`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MaterializationError::Repository { .. } | MaterializationError::TimedOut { .. }
        )
    }

    pub fn stage(&self) -> Stage {
        match self {
            MaterializationError::InvalidConfig { .. } | MaterializationError::ConfigNotFound(_) => {
                Stage::LoadingConfig
            }
            MaterializationError::Repository { stage, .. } => *stage,
            MaterializationError::SourceHash(_) => Stage::Hashing,
            MaterializationError::TimedOut { .. } => Stage::Failed
        }
    }
}

fn at(stage: Stage) -> impl FnOnce(RepositoryError) -> MaterializationError {
    move |source| MaterializationError::Repository { stage, source }
}

/// Runs materializations against a repository and a cache store.
///
/// Runs for the same configuration hash are serialized; runs for different
/// hashes proceed independently.
pub struct Materializer<R: MatchRepository, C: CacheStore, M: RatingModel> {
    repository: Arc<R>,
    cache: Arc<C>,
    model: M,
    locks: KeyedLocks
}

impl<R: MatchRepository, C: CacheStore, M: RatingModel> Materializer<R, C, M> {
    pub fn new(repository: Arc<R>, cache: Arc<C>, model: M) -> Self {
        Materializer {
            repository,
            cache,
            model,
            locks: KeyedLocks::new()
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Brings the cache for `config_hash` up to date.
    ///
    /// Returns [`MaterializationOutcome::CacheHit`] without writing when the
    /// cached snapshot was computed from the same match data, unless
    /// `force_refresh` is set.
    #[instrument(
        skip(self, config_hash),
        fields(run_id = %Uuid::new_v4(), config = %short_hash(config_hash))
    )]
    pub async fn materialize(
        &self,
        config_hash: &str,
        force_refresh: bool
    ) -> Result<MaterializationOutcome, MaterializationError> {
        let _guard = self.locks.lock(config_hash).await;

        let outcome = self.run(config_hash, force_refresh).await;
        if let Err(e) = &outcome {
            error!(stage = %Stage::Failed, failed_at = %e.stage(), kind = e.kind(), "{}", e);
        }

        outcome
    }

    /// [`Materializer::materialize`] bounded by `timeout`.
    ///
    /// A run that times out may have cleared the cache without rewriting it.
    pub async fn materialize_within(
        &self,
        config_hash: &str,
        force_refresh: bool,
        timeout: Duration
    ) -> Result<MaterializationOutcome, MaterializationError> {
        tokio::time::timeout(timeout, self.materialize(config_hash, force_refresh))
            .await
            .map_err(|_| {
                warn!("Materialization of {} timed out after {:?}", short_hash(config_hash), timeout);
                MaterializationError::TimedOut {
                    config_hash: config_hash.to_string(),
                    after: timeout
                }
            })?
    }

    async fn run(&self, config_hash: &str, force_refresh: bool) -> Result<MaterializationOutcome, MaterializationError> {
        info!(stage = %Stage::LoadingConfig, force_refresh, "Loading configuration");
        let (config, key_matches_rules) = self.load_config(config_hash).await?;

        info!(stage = %Stage::LoadingMatches, "Loading matches from {} to {}", config.start_date, config.end_date);
        let raw_matches = self
            .repository
            .list_matches(config.start_date, config.end_date)
            .await
            .map_err(at(Stage::LoadingMatches))?;
        let (matches, skipped) = prepare_matches(raw_matches, &config);
        info!("{} matches to process", matches.len());

        info!(stage = %Stage::Hashing, "Hashing match data");
        let source_data_hash = hash_matches(&matches).map_err(MaterializationError::SourceHash)?;
        debug!("Source data hash {}", source_data_hash);

        if force_refresh {
            info!(stage = %Stage::CacheCheck, "Skipping cache check, refresh forced");
        } else if !key_matches_rules {
            // The cached snapshot may have been computed from other rules
            info!(stage = %Stage::CacheCheck, "Skipping cache check, stored rules do not match their key");
        } else {
            info!(stage = %Stage::CacheCheck, "Checking cached snapshot");
            let cached = self
                .cache
                .read_source_hash(config_hash)
                .await
                .map_err(at(Stage::CacheCheck))?;

            if cached.as_deref() == Some(source_data_hash.as_str()) {
                info!(stage = %Stage::CacheHit, "Cache is up to date");
                return Ok(MaterializationOutcome::CacheHit {
                    config_hash: config_hash.to_string(),
                    source_data_hash
                });
            }
        }

        info!(stage = %Stage::Recomputing, "Replaying {} matches", matches.len());
        let replay = replay(&self.model, &config, &matches);

        let summary = MaterializationSummary {
            config_hash: config_hash.to_string(),
            participant_count: replay.ratings.len(),
            match_count: matches.len(),
            skipped_matches: skipped,
            source_data_hash: source_data_hash.clone()
        };

        let snapshot = CacheSnapshot {
            config_hash: config_hash.to_string(),
            window_start: config.start_date,
            window_end: config.end_date,
            ratings: replay.ratings,
            results: replay.results,
            source_data_hash,
            computed_at: Utc::now()
        };

        info!(stage = %Stage::Storing, "Storing {} ratings and {} results", snapshot.ratings.len(), snapshot.results.len());
        self.cache.clear(config_hash).await.map_err(at(Stage::Storing))?;
        self.cache.write(&snapshot).await.map_err(at(Stage::Storing))?;

        info!(
            stage = %Stage::Done,
            "Materialized {} participants over {} matches",
            summary.participant_count,
            summary.match_count
        );
        Ok(MaterializationOutcome::Materialized(summary))
    }

    /// The validated configuration, and whether its rules hash to `config_hash`.
    async fn load_config(&self, config_hash: &str) -> Result<(MaterializationConfig, bool), MaterializationError> {
        let raw = self
            .repository
            .get_config(config_hash)
            .await
            .map_err(at(Stage::LoadingConfig))?
            .ok_or_else(|| MaterializationError::ConfigNotFound(config_hash.to_string()))?;

        let (config, computed_hash) =
            validate_and_hash(&raw).map_err(|source| MaterializationError::InvalidConfig {
                config_hash: config_hash.to_string(),
                source
            })?;

        let key_matches_rules = computed_hash == config_hash;
        if !key_matches_rules {
            // Results are still stored under the requested key
            warn!(
                "Configuration '{}' is stored under {} but its rules hash to {}",
                config.name,
                short_hash(config_hash),
                short_hash(&computed_hash)
            );
        }

        Ok((config, key_matches_rules))
    }
}

/// Keeps finished matches inside the window, converts them, drops malformed
/// ones with a warning, and sorts the rest into replay order.
///
/// Returns the matches and the number of malformed matches skipped.
pub fn prepare_matches(raw_matches: Vec<RawMatch>, config: &MaterializationConfig) -> (Vec<Match>, usize) {
    let mut matches = Vec::with_capacity(raw_matches.len());
    let mut skipped = 0;

    for raw in raw_matches {
        if !raw.is_finished() || !config.in_window(raw.started_at) {
            continue;
        }

        match Match::try_from(raw) {
            Ok(m) => matches.push(m),
            Err(e) => {
                warn!("Skipping malformed match: {}", e);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed matches", skipped);
    }

    sort_matches(&mut matches);
    (matches, skipped)
}
