use crate::{
    config::MaterializationConfig,
    model::structures::{match_record::Match, seat::Seat}
};
use itertools::Itertools;
use std::cmp::Reverse;

/// Placement, margin and rating weight of one seat in a match.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSeat {
    pub seat: Seat,
    pub participant_id: String,
    pub final_score: i64,
    /// 1-based
    pub placement: u8,
    pub plus_minus: i64,
    pub weight: f64
}

/// Scores a match. The result is in canonical seat order, so index `i` always
/// belongs to `Seat::ALL[i]`.
///
/// Seats are ranked by final score, highest first. Equal scores go to the seat
/// that comes first in canonical order.
pub fn score_match(match_: &Match, config: &MaterializationConfig) -> [ScoredSeat; Seat::COUNT] {
    let placements = placements(match_);

    Seat::ALL.map(|seat| {
        let result = match_.seat(seat);
        let placement = placements[seat.index()];
        let plus_minus = plus_minus(result.final_score, placement, config);

        ScoredSeat {
            seat,
            participant_id: result.participant_id.clone(),
            final_score: result.final_score,
            placement,
            plus_minus,
            weight: rating_weight(plus_minus, config)
        }
    })
}

/// 1-based placement of every seat, indexed by [`Seat::index`].
pub fn placements(match_: &Match) -> [u8; Seat::COUNT] {
    let mut placements = [0u8; Seat::COUNT];

    Seat::ALL
        .iter()
        .sorted_by_key(|seat| (Reverse(match_.seat(**seat).final_score), **seat))
        .enumerate()
        .for_each(|(rank, seat)| placements[seat.index()] = rank as u8 + 1);

    placements
}

/// `final_score - oka + uma[placement - 1]`
pub fn plus_minus(final_score: i64, placement: u8, config: &MaterializationConfig) -> i64 {
    final_score - config.oka + config.uma[usize::from(placement) - 1]
}

/// Margin-of-victory weight, clamped to the configured bounds.
pub fn rating_weight(plus_minus: i64, config: &MaterializationConfig) -> f64 {
    let weight = 1.0 + plus_minus as f64 / config.weight_divisor;
    weight.max(config.weight_min).min(config.weight_max)
}
