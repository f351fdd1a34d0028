use crate::{
    model::structures::{match_record::Match, seat::Seat},
    utils::hash_utils::sha256_hex
};
use chrono::SecondsFormat;
use serde::Serialize;
use std::{cmp::Ordering, collections::BTreeMap};

// Field order is the serialized key order.
#[derive(Serialize)]
struct CanonicalMatch<'a> {
    id: &'a str,
    seats: BTreeMap<&'static str, CanonicalSeat<'a>>,
    started_at: String
}

#[derive(Serialize)]
struct CanonicalSeat<'a> {
    final_score: i64,
    player_id: &'a str
}

/// Replay order: start time, then match id.
pub fn chronological(a: &Match, b: &Match) -> Ordering {
    a.started_at
        .cmp(&b.started_at)
        .then_with(|| a.match_id.cmp(&b.match_id))
}

pub fn sort_matches(matches: &mut [Match]) {
    matches.sort_by(chronological);
}

/// Content hash of a match set, independent of the order the matches are given in.
///
/// Covers the id, start time and every seat's participant and final score.
pub fn hash_matches(matches: &[Match]) -> Result<String, serde_json::Error> {
    let mut ordered: Vec<&Match> = matches.iter().collect();
    ordered.sort_by(|a, b| chronological(a, b));

    let canonical: Vec<CanonicalMatch> = ordered.into_iter().map(canonical_match).collect();

    let json = serde_json::to_string(&canonical)?;
    Ok(sha256_hex(json.as_bytes()))
}

fn canonical_match(m: &Match) -> CanonicalMatch<'_> {
    let seats = m
        .seats
        .iter()
        .zip(Seat::ALL)
        .map(|(result, seat)| {
            (
                seat.as_str(),
                CanonicalSeat {
                    final_score: result.final_score,
                    player_id: &result.participant_id
                }
            )
        })
        .collect();

    CanonicalMatch {
        id: &m.match_id,
        seats,
        started_at: m.started_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}
