use crate::model::structures::seat::Seat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The outcome of one match for one participant, with the rating belief on
/// either side of the update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResultRecord {
    pub match_id: String,
    pub participant_id: String,
    pub seat: Seat,
    pub started_at: DateTime<Utc>,
    pub final_score: i64,
    pub placement: u8,
    pub plus_minus: i64,
    pub rating_weight: f64,
    pub mean_before: f64,
    pub uncertainty_before: f64,
    pub mean_after: f64,
    pub uncertainty_after: f64
}
