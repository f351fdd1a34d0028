use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Fields are declared in alphabetical order of their serialized names. The
// canonical form used for hashing depends on it.

/// The stored rule document of a configuration. Metadata such as the
/// configuration name is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    pub qualification: QualificationRules,
    pub rating: RatingRules,
    pub scoring: ScoringRules,
    pub time_range: TimeRange,
    pub weights: WeightRules
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualificationRules {
    pub drop_worst: u32,
    pub min_games: u32
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRules {
    pub confidence_factor: f64,
    pub decay_rate: f64,
    pub initial_mu: f64,
    pub initial_sigma: f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringRules {
    pub oka: i64,
    pub uma: Vec<i64>
}

/// `name` may be present in stored documents; it is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub end_date: NaiveDate,
    pub start_date: NaiveDate
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightRules {
    pub divisor: f64,
    pub max: f64,
    pub min: f64
}
