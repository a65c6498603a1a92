//! One-parameter logistic (Rasch) model.
//!
//! Discrimination is fixed at 1; only the difficulty is estimated.

use adaptest_core::model::{clamp_to_sentinel, Observation, ParamVector};

use crate::math::{clamp_prob, log_sigmoid, newton_1d, sigmoid, NEWTON_MAX_ITER, NEWTON_TOL};
use crate::traits::{Estimate, PsychometricModel};

/// Registry name of the Rasch model.
pub const NAME: &str = "1pl";

#[derive(Debug, Default)]
pub struct OneParamLogistic;

impl OneParamLogistic {
    fn difficulty(params: &ParamVector) -> f64 {
        params.difficulty()
    }
}

impl PsychometricModel for OneParamLogistic {
    fn name(&self) -> &str {
        NAME
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        vec!["difficulty"]
    }

    fn parameter_count(&self) -> usize {
        1
    }

    fn expected_score(&self, theta: f64, params: &ParamVector) -> f64 {
        sigmoid(theta - Self::difficulty(params))
    }

    fn log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        let z = theta - Self::difficulty(params);
        fraction * log_sigmoid(z) + (1.0 - fraction) * log_sigmoid(-z)
    }

    fn d1_log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        fraction - self.expected_score(theta, params)
    }

    fn d2_log_likelihood(&self, theta: f64, params: &ParamVector, _fraction: f64) -> f64 {
        let p = clamp_prob(self.expected_score(theta, params));
        -p * (1.0 - p)
    }

    fn fisher_information(&self, theta: f64, params: &ParamVector) -> f64 {
        let p = self.expected_score(theta, params);
        p * (1.0 - p)
    }

    fn estimate_item_params(
        &self,
        observations: &[Observation],
        previous: Option<&ParamVector>,
    ) -> Estimate {
        if observations.is_empty() {
            return Estimate::NotConverged;
        }

        let seed = match previous {
            Some(v) => v.difficulty(),
            None => seed_difficulty(observations),
        };

        let solved = newton_1d(seed, NEWTON_MAX_ITER, NEWTON_TOL, |b| {
            let mut g = 0.0;
            let mut h = 0.0;
            for o in observations {
                let p = clamp_prob(sigmoid(o.ability - b));
                g += p - o.fraction;
                h -= p * (1.0 - p);
            }
            (g, h)
        });

        match solved {
            Some(b) => Estimate::Converged(ParamVector::Dichotomous {
                difficulty: clamp_to_sentinel(b),
                discrimination: 1.0,
                guessing: 0.0,
            }),
            None => Estimate::NotConverged,
        }
    }
}

/// Mean-fraction logit seed: with roughly centered abilities, the observed
/// proportion correct pins the difficulty.
pub(crate) fn seed_difficulty(observations: &[Observation]) -> f64 {
    let n = observations.len() as f64;
    let mean_theta = observations.iter().map(|o| o.ability).sum::<f64>() / n;
    let p = (observations.iter().map(|o| o.fraction).sum::<f64>() / n).clamp(0.01, 0.99);
    mean_theta - (p / (1.0 - p)).ln()
}
