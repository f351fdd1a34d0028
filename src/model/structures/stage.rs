use serde::Serialize;
use strum_macros::{Display, EnumIter};

/// Stages of a materialization run, in the order they are entered.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    LoadingConfig,
    LoadingMatches,
    Hashing,
    CacheCheck,
    CacheHit,
    Recomputing,
    Storing,
    Done,
    Failed
}
