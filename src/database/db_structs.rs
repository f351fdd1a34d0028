use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status value of a completed match in the source log.
pub const FINISHED_STATUS: &str = "finished";

/// A stored configuration row. `config_data` is the rule document, kept as raw
/// JSON until it is validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub config_hash: String,
    pub name: String,
    pub description: Option<String>,
    pub config_data: serde_json::Value
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigSummary {
    pub config_hash: String,
    pub name: String,
    pub description: Option<String>,
    pub is_official: bool
}

/// A match as the repository returns it, before well-formedness is checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMatch {
    pub match_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub seats: Vec<RawSeat>
}

impl RawMatch {
    pub fn is_finished(&self) -> bool {
        self.status == FINISHED_STATUS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSeat {
    pub seat: String,
    pub participant_id: String,
    pub final_score: Option<i64>
}
