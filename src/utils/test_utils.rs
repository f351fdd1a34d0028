use crate::{
    config::{validate_and_hash, MaterializationConfig},
    database::db_structs::{RawConfig, RawMatch, RawSeat, FINISHED_STATUS},
    model::structures::{
        match_record::{Match, SeatResult},
        seat::Seat
    },
    utils::hash_utils::sha256_hex
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{seq::IndexedRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

/// 2024-01-15T19:00:00Z plus `secs` seconds.
pub fn generate_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 19, 0, 0).unwrap() + Duration::seconds(secs)
}

/// A rule document covering all of 2024 with a 20000 oka and a 10-5 uma.
pub fn generate_config_data() -> serde_json::Value {
    json!({
        "timeRange": {
            "startDate": "2024-01-01",
            "endDate": "2024-12-31"
        },
        "rating": {
            "initialMu": 25.0,
            "initialSigma": 8.33,
            "confidenceFactor": 2.0,
            "decayRate": 0.02
        },
        "scoring": {
            "oka": 20000,
            "uma": [10000, 5000, -5000, -10000]
        },
        "weights": {
            "divisor": 40.0,
            "min": 0.5,
            "max": 1.5
        },
        "qualification": {
            "minGames": 8,
            "dropWorst": 2
        }
    })
}

/// Wraps a rule document in a stored configuration row. The row's hash is the
/// document's canonical hash when it validates, otherwise a hash of the raw JSON.
pub fn generate_raw_config(name: &str, config_data: serde_json::Value) -> RawConfig {
    let mut raw = RawConfig {
        config_hash: String::new(),
        name: name.to_string(),
        description: None,
        config_data
    };

    raw.config_hash = match validate_and_hash(&raw) {
        Ok((_, hash)) => hash,
        Err(_) => sha256_hex(raw.config_data.to_string().as_bytes())
    };

    raw
}

pub fn generate_config() -> MaterializationConfig {
    let (config, _) = validate_and_hash(&generate_raw_config("Test Season", generate_config_data()))
        .expect("default test configuration must be valid");

    config
}

pub fn generate_config_with(weight_divisor: f64, weight_min: f64, weight_max: f64) -> MaterializationConfig {
    MaterializationConfig {
        weight_divisor,
        weight_min,
        weight_max,
        ..generate_config()
    }
}

/// A match with `seats` given in canonical seat order as `(participant, score)`.
pub fn generate_match(match_id: &str, started_at: DateTime<Utc>, seats: [(&str, i64); Seat::COUNT]) -> Match {
    Match {
        match_id: match_id.to_string(),
        started_at,
        seats: seats.map(|(participant_id, final_score)| SeatResult {
            participant_id: participant_id.to_string(),
            final_score
        })
    }
}

/// A finished raw match with `seats` given as `(seat label, participant, score)`.
pub fn generate_raw_match(match_id: &str, started_at: DateTime<Utc>, seats: [(&str, &str, i64); 4]) -> RawMatch {
    RawMatch {
        match_id: match_id.to_string(),
        started_at,
        finished_at: Some(started_at + Duration::minutes(45)),
        status: FINISHED_STATUS.to_string(),
        seats: seats
            .iter()
            .map(|(seat, participant_id, final_score)| RawSeat {
                seat: seat.to_string(),
                participant_id: participant_id.to_string(),
                final_score: Some(*final_score)
            })
            .collect()
    }
}

/// `n` finished matches between randomly drawn tables of `participants`,
/// one hour apart starting at [`generate_timestamp`]`(0)`.
///
/// Scores sum to 100000 per table. Seeded, so the same arguments always
/// produce the same matches.
pub fn generate_raw_matches(n: usize, participants: &[String]) -> Vec<RawMatch> {
    assert!(
        participants.len() >= Seat::COUNT,
        "At least {} participants are needed to fill a table",
        Seat::COUNT
    );

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut matches = Vec::with_capacity(n);

    for i in 0..n {
        let table: Vec<&String> = participants.choose_multiple(&mut rng, Seat::COUNT).collect();

        let mut scores = [0i64; Seat::COUNT];
        let mut remaining = 100_000i64;
        for score in scores.iter_mut().take(Seat::COUNT - 1) {
            // Multiples of 100, as in real point sticks
            *score = rng.random_range(-100..=500) * 100;
            remaining -= *score;
        }
        scores[Seat::COUNT - 1] = remaining;

        let started_at = generate_timestamp(i as i64 * 3600);
        matches.push(RawMatch {
            match_id: format!("match-{:06}", i),
            started_at,
            finished_at: Some(started_at + Duration::minutes(45)),
            status: FINISHED_STATUS.to_string(),
            seats: Seat::ALL
                .iter()
                .zip(table)
                .zip(scores)
                .map(|((seat, participant_id), final_score)| RawSeat {
                    seat: seat.to_string(),
                    participant_id: participant_id.clone(),
                    final_score: Some(final_score)
                })
                .collect()
        });
    }

    matches
}

/// Participant ids `player-001`, `player-002`, ...
pub fn generate_participants(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("player-{:03}", i)).collect()
}
