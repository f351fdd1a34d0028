use crate::{
    config::MaterializationConfig,
    model::{
        rating_model::{Belief, RatingModel},
        rating_tracker::RatingTracker,
        scoring::score_match,
        structures::{
            match_record::Match, match_result::MatchResultRecord, participant_rating::ParticipantRatingState
        }
    },
    utils::progress_utils::progress_bar
};

/// Final output of a replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    /// Sorted by display rating, highest first
    pub ratings: Vec<ParticipantRatingState>,
    /// One record per participant per match, in replay order
    pub results: Vec<MatchResultRecord>
}

/// Replays a chronological match log through a [`RatingModel`].
pub struct ReplayModel<'a, M: RatingModel + ?Sized> {
    pub model: &'a M,
    pub config: &'a MaterializationConfig,
    pub rating_tracker: RatingTracker,
    results: Vec<MatchResultRecord>
}

impl<'a, M: RatingModel + ?Sized> ReplayModel<'a, M> {
    pub fn new(model: &'a M, config: &'a MaterializationConfig) -> Self {
        ReplayModel {
            model,
            config,
            rating_tracker: RatingTracker::new(),
            results: Vec::new()
        }
    }

    /// Processes `matches` in the order given. Callers sort them first.
    pub fn process(&mut self, matches: &[Match]) {
        let progress_bar = progress_bar(matches.len() as u64, "Replaying matches".to_string());

        for m in matches {
            self.process_match(m);

            if let Some(bar) = &progress_bar {
                bar.inc(1);
            }
        }

        if let Some(bar) = progress_bar {
            bar.finish_and_clear();
        }
    }

    pub fn finish(self) -> Replay {
        Replay {
            ratings: self.rating_tracker.into_leaderboard(),
            results: self.results
        }
    }

    /// Applies a single match.
    ///
    /// 1. Seed any participant seen for the first time.
    /// 2. Score every seat (placement, margin, weight).
    /// 3. Hand priors, placements and weights to the model in canonical seat order,
    ///    all built from the same scored array so entry `i` is always the same seat.
    /// 4. Write each posterior back and record the result.
    fn process_match(&mut self, match_: &Match) {
        self.rating_tracker.seed(match_.participant_ids(), self.config);

        let scored = score_match(match_, self.config);

        let priors: Vec<Belief> = scored
            .iter()
            .map(|s| {
                self.rating_tracker
                    .belief(&s.participant_id)
                    .unwrap_or(self.initial_belief())
            })
            .collect();
        let placements: Vec<usize> = scored.iter().map(|s| usize::from(s.placement)).collect();
        let weights: Vec<f64> = scored.iter().map(|s| s.weight).collect();

        let posteriors = self.model.rate(&priors, &placements, &weights);
        debug_assert_eq!(posteriors.len(), scored.len());

        for ((seat, prior), posterior) in scored.iter().zip(&priors).zip(&posteriors) {
            self.rating_tracker.update(
                &seat.participant_id,
                *posterior,
                seat.plus_minus,
                match_.started_at,
                self.config
            );

            self.results.push(MatchResultRecord {
                match_id: match_.match_id.clone(),
                participant_id: seat.participant_id.clone(),
                seat: seat.seat,
                started_at: match_.started_at,
                final_score: seat.final_score,
                placement: seat.placement,
                plus_minus: seat.plus_minus,
                rating_weight: seat.weight,
                mean_before: prior.mean,
                uncertainty_before: prior.uncertainty,
                mean_after: posterior.mean,
                uncertainty_after: posterior.uncertainty
            });
        }
    }

    fn initial_belief(&self) -> Belief {
        Belief {
            mean: self.config.initial_mean,
            uncertainty: self.config.initial_uncertainty
        }
    }
}

/// Replays `matches` in the order given and returns the final state.
pub fn replay<M: RatingModel + ?Sized>(model: &M, config: &MaterializationConfig, matches: &[Match]) -> Replay {
    let mut replay_model = ReplayModel::new(model, config);
    replay_model.process(matches);
    replay_model.finish()
}
