use crate::{database::db_structs::RawMatch, model::structures::seat::Seat};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashSet, convert::TryFrom, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatResult {
    pub participant_id: String,
    pub final_score: i64
}

/// A well-formed, completed match: every seat is present exactly once and has a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub match_id: String,
    pub started_at: DateTime<Utc>,
    /// Indexed by [`Seat::index`]
    pub seats: [SeatResult; Seat::COUNT]
}

impl Match {
    pub fn seat(&self, seat: Seat) -> &SeatResult {
        &self.seats[seat.index()]
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.seats.iter().map(|s| s.participant_id.as_str())
    }
}

/// Reasons a raw match is excluded from processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMatch {
    #[error("match {match_id} has no {seat} seat")]
    MissingSeat { match_id: String, seat: Seat },
    #[error("match {match_id} lists the {seat} seat more than once")]
    DuplicateSeat { match_id: String, seat: Seat },
    #[error("match {match_id} has an unknown seat label '{label}'")]
    UnknownSeat { match_id: String, label: String },
    #[error("match {match_id} has no final score for the {seat} seat")]
    MissingScore { match_id: String, seat: Seat },
    #[error("match {match_id} seats participant {participant_id} more than once")]
    DuplicateParticipant { match_id: String, participant_id: String }
}

impl TryFrom<RawMatch> for Match {
    type Error = MalformedMatch;

    fn try_from(raw: RawMatch) -> Result<Self, Self::Error> {
        let mut slots: [Option<SeatResult>; Seat::COUNT] = Default::default();

        for raw_seat in raw.seats {
            let seat = Seat::from_str(&raw_seat.seat).map_err(|_| MalformedMatch::UnknownSeat {
                match_id: raw.match_id.clone(),
                label: raw_seat.seat.clone()
            })?;

            let final_score = raw_seat.final_score.ok_or_else(|| MalformedMatch::MissingScore {
                match_id: raw.match_id.clone(),
                seat
            })?;

            let slot = &mut slots[seat.index()];
            if slot.is_some() {
                return Err(MalformedMatch::DuplicateSeat {
                    match_id: raw.match_id,
                    seat
                });
            }

            *slot = Some(SeatResult {
                participant_id: raw_seat.participant_id,
                final_score
            });
        }

        let mut seen = HashSet::with_capacity(Seat::COUNT);
        for seat in Seat::ALL {
            match &slots[seat.index()] {
                None => {
                    return Err(MalformedMatch::MissingSeat {
                        match_id: raw.match_id,
                        seat
                    })
                }
                Some(result) => {
                    if !seen.insert(result.participant_id.as_str()) {
                        return Err(MalformedMatch::DuplicateParticipant {
                            match_id: raw.match_id.clone(),
                            participant_id: result.participant_id.clone()
                        });
                    }
                }
            }
        }

        let [east, south, west, north] = slots;
        match (east, south, west, north) {
            (Some(east), Some(south), Some(west), Some(north)) => Ok(Match {
                match_id: raw.match_id,
                started_at: raw.started_at,
                seats: [east, south, west, north]
            }),
            // Every slot was checked above
            _ => Err(MalformedMatch::MissingSeat {
                match_id: raw.match_id,
                seat: Seat::East
            })
        }
    }
}
