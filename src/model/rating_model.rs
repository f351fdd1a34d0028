use crate::model::constants::{BETA, KAPPA};
use openskill::{
    model::{model::Model, plackett_luce::PlackettLuce},
    rating::{default_gamma, Rating}
};

/// A participant's rating belief: mean skill and the uncertainty around it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Belief {
    pub mean: f64,
    pub uncertainty: f64
}

/// A ranked-outcome rating update.
///
/// `priors`, `placements` and `weights` are parallel slices; entry `i` of each
/// describes the same participant, who plays as a one-person team. Placements
/// are 1-based, lower is better. The returned posteriors are in the same order.
///
/// Implementations must be pure: the result depends only on the arguments.
pub trait RatingModel: Send + Sync {
    fn rate(&self, priors: &[Belief], placements: &[usize], weights: &[f64]) -> Vec<Belief>;
}

/// Plackett-Luce through the `openskill` crate, with each participant's update
/// scaled by their margin weight.
///
/// For a one-person team the weighted Plackett-Luce update is the unweighted
/// one with its mean step multiplied by the weight, and its variance shrink
/// factor `1 - (sigma'/sigma)^2` multiplied by the weight (floored at kappa).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenSkillModel {
    pub beta: f64,
    pub kappa: f64
}

impl OpenSkillModel {
    pub fn new(beta: f64, kappa: f64) -> Self {
        OpenSkillModel { beta, kappa }
    }

    fn weighted(&self, prior: Belief, rated: &Rating, weight: f64) -> Belief {
        let mean = prior.mean + weight * (rated.mu - prior.mean);

        let shrink = 1.0 - (rated.sigma / prior.uncertainty).powi(2);
        let uncertainty = prior.uncertainty * (1.0 - weight * shrink).max(self.kappa).sqrt();

        Belief { mean, uncertainty }
    }
}

impl Default for OpenSkillModel {
    fn default() -> Self {
        OpenSkillModel::new(BETA, KAPPA)
    }
}

impl RatingModel for OpenSkillModel {
    fn rate(&self, priors: &[Belief], placements: &[usize], weights: &[f64]) -> Vec<Belief> {
        debug_assert_eq!(priors.len(), placements.len());
        debug_assert_eq!(priors.len(), weights.len());

        let model = PlackettLuce::new(self.beta, self.kappa, default_gamma);
        let teams: Vec<Vec<Rating>> = priors
            .iter()
            .map(|prior| {
                vec![Rating {
                    mu: prior.mean,
                    sigma: prior.uncertainty
                }]
            })
            .collect();

        let results: Vec<Rating> = model.rate(teams, placements.to_vec()).into_iter().flatten().collect();

        priors
            .iter()
            .zip(results.iter())
            .zip(weights.iter())
            .map(|((prior, rated), weight)| self.weighted(*prior, rated, *weight))
            .collect()
    }
}
