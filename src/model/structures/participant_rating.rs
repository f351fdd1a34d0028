use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rating belief and running aggregates for one participant within a single
/// materialization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRatingState {
    pub participant_id: String,
    pub mean: f64,
    pub uncertainty: f64,
    /// `mean - confidence_factor * uncertainty`
    pub display_rating: f64,
    pub matches_played: u32,
    pub total_margin: i64,
    /// Largest positive margin seen, if any
    pub best_margin: Option<i64>,
    /// Most negative margin seen, if any
    pub worst_margin: Option<i64>,
    pub last_match_at: Option<DateTime<Utc>>
}
