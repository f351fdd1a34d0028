//! Materialization configuration: validation and canonical hashing.
//!
//! A configuration is identified by the SHA-256 of its normalized rule fields.
//! Renaming a configuration does not change its hash; changing any rule does.

pub mod document;

use crate::{database::db_structs::RawConfig, utils::hash_utils::sha256_hex};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use document::{ConfigDocument, QualificationRules, RatingRules, ScoringRules, TimeRange, WeightRules};
use thiserror::Error;

pub const UMA_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("uma must have exactly 4 values, got {0}")]
    UmaLength(usize),
    #[error("weight min/max must be positive (min = {min}, max = {max})")]
    NonPositiveWeightBounds { min: f64, max: f64 },
    #[error("weight min must be less than weight max (min = {min}, max = {max})")]
    WeightBoundsOrder { min: f64, max: f64 },
    #[error("initial uncertainty must be positive, got {0}")]
    NonPositiveInitialUncertainty(f64),
    #[error("confidence factor must be positive, got {0}")]
    NonPositiveConfidenceFactor(f64),
    #[error("initial mean must be positive, got {0}")]
    NonPositiveInitialMean(f64),
    #[error("weight divisor must be a non-zero finite number, got {0}")]
    InvalidWeightDivisor(f64),
    #[error("time window starts after it ends ({start} > {end})")]
    InvertedTimeWindow { start: NaiveDate, end: NaiveDate }
}

/// A validated configuration. Only obtainable through [`MaterializationConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationConfig {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    pub initial_mean: f64,
    pub initial_uncertainty: f64,
    pub confidence_factor: f64,
    /// Carried for downstream consumers; the pipeline does not decay ratings.
    pub decay_rate: f64,

    pub oka: i64,
    pub uma: [i64; UMA_LEN],

    pub weight_divisor: f64,
    pub weight_min: f64,
    pub weight_max: f64,

    pub min_games: u32,
    pub drop_worst: u32
}

impl MaterializationConfig {
    /// Checks every invariant of the document, failing on the first one violated.
    pub fn validate(name: &str, document: ConfigDocument) -> Result<Self, ConfigError> {
        let ConfigDocument {
            qualification,
            rating,
            scoring,
            time_range,
            weights
        } = document;

        let uma: [i64; UMA_LEN] = scoring
            .uma
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::UmaLength(scoring.uma.len()))?;

        if !(weights.min > 0.0 && weights.max > 0.0) {
            return Err(ConfigError::NonPositiveWeightBounds {
                min: weights.min,
                max: weights.max
            });
        }

        if weights.min >= weights.max {
            return Err(ConfigError::WeightBoundsOrder {
                min: weights.min,
                max: weights.max
            });
        }

        if !(rating.initial_sigma > 0.0) {
            return Err(ConfigError::NonPositiveInitialUncertainty(rating.initial_sigma));
        }

        if !(rating.confidence_factor > 0.0) {
            return Err(ConfigError::NonPositiveConfidenceFactor(rating.confidence_factor));
        }

        if !(rating.initial_mu > 0.0) {
            return Err(ConfigError::NonPositiveInitialMean(rating.initial_mu));
        }

        if weights.divisor == 0.0 || !weights.divisor.is_finite() {
            return Err(ConfigError::InvalidWeightDivisor(weights.divisor));
        }

        if time_range.start_date > time_range.end_date {
            return Err(ConfigError::InvertedTimeWindow {
                start: time_range.start_date,
                end: time_range.end_date
            });
        }

        Ok(MaterializationConfig {
            name: name.to_string(),
            start_date: time_range.start_date,
            end_date: time_range.end_date,
            initial_mean: rating.initial_mu,
            initial_uncertainty: rating.initial_sigma,
            confidence_factor: rating.confidence_factor,
            decay_rate: rating.decay_rate,
            oka: scoring.oka,
            uma,
            weight_divisor: weights.divisor,
            weight_min: weights.min,
            weight_max: weights.max,
            min_games: qualification.min_games,
            drop_worst: qualification.drop_worst
        })
    }

    /// The normalized rule document this configuration was built from.
    pub fn document(&self) -> ConfigDocument {
        ConfigDocument {
            qualification: QualificationRules {
                drop_worst: self.drop_worst,
                min_games: self.min_games
            },
            rating: RatingRules {
                confidence_factor: self.confidence_factor,
                decay_rate: self.decay_rate,
                initial_mu: self.initial_mean,
                initial_sigma: self.initial_uncertainty
            },
            scoring: ScoringRules {
                oka: self.oka,
                uma: self.uma.to_vec()
            },
            time_range: TimeRange {
                end_date: self.end_date,
                start_date: self.start_date
            },
            weights: WeightRules {
                divisor: self.weight_divisor,
                max: self.weight_max,
                min: self.weight_min
            }
        }
    }

    /// Compact JSON of the normalized rules with keys in sorted order.
    pub fn canonical_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(&self.document())?)
    }

    pub fn config_hash(&self) -> Result<String, ConfigError> {
        Ok(sha256_hex(self.canonical_json()?.as_bytes()))
    }

    /// The time window as a half-open UTC range: midnight of `start_date` up to
    /// midnight after `end_date`.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        window_bounds(self.start_date, self.end_date)
    }

    /// Whether a match starting at `started_at` falls within the window.
    pub fn in_window(&self, started_at: DateTime<Utc>) -> bool {
        let (start, end) = self.window();
        start <= started_at && started_at < end
    }

    /// Conservative point estimate used for ranking.
    pub fn display_rating(&self, mean: f64, uncertainty: f64) -> f64 {
        mean - self.confidence_factor * uncertainty
    }
}

/// Half-open UTC bounds covering every day in `start..=end`.
pub fn window_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let lower = start.and_time(NaiveTime::MIN).and_utc();
    let upper = end
        .checked_add_days(Days::new(1))
        .map(|next| next.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    (lower, upper)
}

/// Parses and validates a stored configuration, returning it with its content hash.
pub fn validate_and_hash(raw: &RawConfig) -> Result<(MaterializationConfig, String), ConfigError> {
    let document: ConfigDocument = serde_json::from_value(raw.config_data.clone())?;
    let config = MaterializationConfig::validate(&raw.name, document)?;
    let hash = config.config_hash()?;

    Ok((config, hash))
}
