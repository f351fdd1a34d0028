use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::{
    config::MaterializationConfig,
    model::{rating_model::Belief, structures::participant_rating::ParticipantRatingState}
};

/// Owns the rating state of every participant during a replay.
///
/// States are keyed by participant id and kept in first-seen order until
/// [`RatingTracker::into_leaderboard`] sorts them.
pub struct RatingTracker {
    leaderboard: IndexMap<String, ParticipantRatingState>
}

impl Default for RatingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RatingTracker {
    pub fn new() -> RatingTracker {
        RatingTracker {
            leaderboard: IndexMap::new()
        }
    }

    /// Inserts a seed state for each participant not already tracked.
    /// Existing states are left untouched.
    pub fn seed<'a>(&mut self, participant_ids: impl IntoIterator<Item = &'a str>, config: &MaterializationConfig) {
        for participant_id in participant_ids {
            if self.leaderboard.contains_key(participant_id) {
                continue;
            }

            self.leaderboard.insert(
                participant_id.to_string(),
                ParticipantRatingState {
                    participant_id: participant_id.to_string(),
                    mean: config.initial_mean,
                    uncertainty: config.initial_uncertainty,
                    display_rating: config.display_rating(config.initial_mean, config.initial_uncertainty),
                    matches_played: 0,
                    total_margin: 0,
                    best_margin: None,
                    worst_margin: None,
                    last_match_at: None
                }
            );
        }
    }

    pub fn get_rating(&self, participant_id: &str) -> Option<&ParticipantRatingState> {
        self.leaderboard.get(participant_id)
    }

    pub fn belief(&self, participant_id: &str) -> Option<Belief> {
        self.get_rating(participant_id).map(|state| Belief {
            mean: state.mean,
            uncertainty: state.uncertainty
        })
    }

    pub fn len(&self) -> usize {
        self.leaderboard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaderboard.is_empty()
    }

    /// Applies one match outcome to a participant: the posterior belief and
    /// the running aggregates. Returns `false` if the participant is not tracked.
    pub fn update(
        &mut self,
        participant_id: &str,
        posterior: Belief,
        plus_minus: i64,
        played_at: DateTime<Utc>,
        config: &MaterializationConfig
    ) -> bool {
        let Some(state) = self.leaderboard.get_mut(participant_id) else {
            return false;
        };

        state.mean = posterior.mean;
        state.uncertainty = posterior.uncertainty;
        state.display_rating = config.display_rating(posterior.mean, posterior.uncertainty);
        state.matches_played += 1;
        state.total_margin += plus_minus;

        // Only positive margins count towards the best, only negative towards the worst
        if plus_minus > 0 {
            state.best_margin = Some(state.best_margin.map_or(plus_minus, |best| best.max(plus_minus)));
        } else if plus_minus < 0 {
            state.worst_margin = Some(state.worst_margin.map_or(plus_minus, |worst| worst.min(plus_minus)));
        }

        state.last_match_at = Some(played_at);

        true
    }

    /// Consumes the tracker, returning all states sorted by display rating
    /// (highest first, ties by participant id).
    pub fn into_leaderboard(mut self) -> Vec<ParticipantRatingState> {
        self.leaderboard.sort_by(|k1, v1, k2, v2| {
            v2.display_rating
                .partial_cmp(&v1.display_rating)
                .unwrap_or(Ordering::Equal)
                .then_with(|| k1.cmp(k2))
        });

        self.leaderboard.into_values().collect()
    }
}
