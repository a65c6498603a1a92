//! The psychometric model contract.
//!
//! Every IRT variant implements [`PsychometricModel`]: response probability,
//! log-likelihood and its ability derivatives, Fisher information, and
//! per-item parameter estimation from (ability, fraction) observations.

use adaptest_core::model::{Observation, ParamVector};

/// Result of a per-item parameter estimation.
///
/// Non-convergence is data, not an error: the calibration strategy leaves
/// the item's status at `NotCalculated` and moves on.
#[derive(Debug, Clone, PartialEq)]
pub enum Estimate {
    Converged(ParamVector),
    NotConverged,
}

impl Estimate {
    pub fn converged(&self) -> Option<&ParamVector> {
        match self {
            Estimate::Converged(v) => Some(v),
            Estimate::NotConverged => None,
        }
    }
}

/// One IRT model variant.
///
/// `theta` is the examinee ability, `params` the item's parameter vector in
/// this model's shape, and `fraction` the observed fraction correct.
pub trait PsychometricModel: Send + Sync {
    /// Registry name of this model (e.g. "1pl").
    fn name(&self) -> &str;

    /// Names of the estimated parameters, in vector order.
    fn parameter_names(&self) -> Vec<&'static str>;

    /// Number of estimated parameters, the `k` of information criteria.
    fn parameter_count(&self) -> usize;

    /// Parameter count for a concrete vector. Models whose vector length
    /// depends on the item (partial credit steps) override this.
    fn parameter_count_for(&self, _params: &ParamVector) -> usize {
        self.parameter_count()
    }

    /// Expected score of an examinee at `theta` on this item: the
    /// probability of a correct response for dichotomous models, the
    /// expected fraction for multi-category models.
    fn expected_score(&self, theta: f64, params: &ParamVector) -> f64;

    /// Log-likelihood of one observed response.
    fn log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64;

    /// Likelihood of one observed response.
    fn likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        self.log_likelihood(theta, params, fraction).exp()
    }

    /// First derivative of the log-likelihood with respect to ability.
    fn d1_log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64;

    /// Second derivative of the log-likelihood with respect to ability.
    fn d2_log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64;

    /// Fisher information of the item at `theta`.
    fn fisher_information(&self, theta: f64, params: &ParamVector) -> f64;

    /// Estimate this item's parameter vector from all observations of the
    /// item, optionally seeded from a previous estimate.
    fn estimate_item_params(
        &self,
        observations: &[Observation],
        previous: Option<&ParamVector>,
    ) -> Estimate;
}
