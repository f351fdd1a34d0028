use crate::model::structures::{match_result::MatchResultRecord, participant_rating::ParticipantRatingState};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Everything materialized for one configuration hash. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub config_hash: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub ratings: Vec<ParticipantRatingState>,
    pub results: Vec<MatchResultRecord>,
    pub source_data_hash: String,
    pub computed_at: DateTime<Utc>
}
