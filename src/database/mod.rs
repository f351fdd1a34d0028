//! Storage seams of the pipeline.
//!
//! [`MatchRepository`] is the read side (configurations and the match log),
//! [`CacheStore`] holds materialized snapshots keyed by configuration hash.
//! [`db::DbClient`] implements both against Postgres, [`memory::InMemoryStore`]
//! implements both in process.

pub mod db;
pub mod db_structs;
pub mod memory;

use std::future::Future;

use chrono::NaiveDate;
use thiserror::Error;

use crate::{
    database::db_structs::{ConfigSummary, RawConfig, RawMatch},
    model::structures::snapshot::CacheSnapshot
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("could not decode {what}: {reason}")]
    Decode { what: String, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("configuration {0} is already stored with different rules")]
    ConfigConflict(String)
}

pub trait MatchRepository: Send + Sync {
    /// The stored configuration for `config_hash`, if any.
    fn get_config(
        &self,
        config_hash: &str
    ) -> impl Future<Output = Result<Option<RawConfig>, RepositoryError>> + Send;

    /// Every match that started on a day in `start..=end` (UTC), whatever its status.
    fn list_matches(
        &self,
        start: NaiveDate,
        end: NaiveDate
    ) -> impl Future<Output = Result<Vec<RawMatch>, RepositoryError>> + Send;

    fn list_configs(&self) -> impl Future<Output = Result<Vec<ConfigSummary>, RepositoryError>> + Send;
}

pub trait CacheStore: Send + Sync {
    /// Source hash of the snapshot stored under `config_hash`, if one is stored.
    fn read_source_hash(
        &self,
        config_hash: &str
    ) -> impl Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// Removes every cached row for `config_hash`.
    fn clear(&self, config_hash: &str) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Stores a snapshot. Readers never observe it partially written.
    fn write(&self, snapshot: &CacheSnapshot) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn read_snapshot(
        &self,
        config_hash: &str
    ) -> impl Future<Output = Result<Option<CacheSnapshot>, RepositoryError>> + Send;
}
