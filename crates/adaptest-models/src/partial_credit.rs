//! Multi-category partial-credit model.
//!
//! One shared discrimination plus an ordered list of (fraction, difficulty)
//! steps. Category probabilities follow the adjacent-category logistic
//! form; an observed fraction maps to the nearest category.

use adaptest_core::model::{clamp_to_sentinel, CategoryStep, Observation, ParamVector};

use crate::math::{logsumexp, sigmoid, MAX_NEWTON_STEP, NEWTON_TOL};
use crate::onepl::seed_difficulty;
use crate::traits::{Estimate, PsychometricModel};

/// Registry name of the partial-credit model.
pub const NAME: &str = "pcm";

const MIN_DISCRIMINATION: f64 = 0.05;
const MAX_DISCRIMINATION: f64 = 25.0;
// Coordinate-wise scoring converges linearly and needs more cycles than
// the joint Newton solves.
const MAX_CYCLES: usize = 200;

#[derive(Debug, Default)]
pub struct PartialCredit;

struct Categories {
    /// Fraction awarded per category, index 0 being the zero category.
    fractions: Vec<f64>,
    /// Step difficulties, one per non-zero category.
    difficulties: Vec<f64>,
    discrimination: f64,
}

impl Categories {
    fn from_params(params: &ParamVector) -> Option<Self> {
        match params {
            ParamVector::PartialCredit {
                discrimination,
                steps,
            } => {
                let mut fractions = vec![0.0];
                fractions.extend(steps.iter().map(|s| s.fraction));
                Some(Self {
                    fractions,
                    difficulties: steps.iter().map(|s| s.difficulty).collect(),
                    discrimination: *discrimination,
                })
            }
            ParamVector::Dichotomous { .. } => None,
        }
    }

    /// Cumulative logits `T_h` for every category at `theta`.
    fn logits(&self, theta: f64) -> Vec<f64> {
        let mut t = Vec::with_capacity(self.fractions.len());
        let mut acc = 0.0;
        t.push(0.0);
        for &b in &self.difficulties {
            acc += self.discrimination * (theta - b);
            t.push(acc);
        }
        t
    }

    fn probabilities(&self, theta: f64) -> Vec<f64> {
        let t = self.logits(theta);
        let norm = logsumexp(&t);
        t.iter().map(|&x| (x - norm).exp()).collect()
    }

    /// Index of the category whose fraction is nearest to `fraction`.
    fn category_of(&self, fraction: f64) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, &f) in self.fractions.iter().enumerate() {
            let d = (f - fraction).abs();
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }
}

impl PsychometricModel for PartialCredit {
    fn name(&self) -> &str {
        NAME
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        vec!["discrimination", "step_difficulties"]
    }

    fn parameter_count(&self) -> usize {
        // Nominal count; the per-item count depends on the step structure.
        2
    }

    fn parameter_count_for(&self, params: &ParamVector) -> usize {
        match params {
            ParamVector::PartialCredit { steps, .. } => steps.len() + 1,
            ParamVector::Dichotomous { .. } => self.parameter_count(),
        }
    }

    fn expected_score(&self, theta: f64, params: &ParamVector) -> f64 {
        let Some(cat) = Categories::from_params(params) else {
            return sigmoid(theta - params.difficulty());
        };
        cat.probabilities(theta)
            .iter()
            .zip(&cat.fractions)
            .map(|(p, f)| p * f)
            .sum()
    }

    fn log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        let Some(cat) = Categories::from_params(params) else {
            return f64::NEG_INFINITY;
        };
        let t = cat.logits(theta);
        let k = cat.category_of(fraction);
        t[k] - logsumexp(&t)
    }

    fn d1_log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        let Some(cat) = Categories::from_params(params) else {
            return 0.0;
        };
        let probs = cat.probabilities(theta);
        let k = cat.category_of(fraction) as f64;
        let mean: f64 = probs.iter().enumerate().map(|(h, p)| h as f64 * p).sum();
        cat.discrimination * (k - mean)
    }

    fn d2_log_likelihood(&self, theta: f64, params: &ParamVector, _fraction: f64) -> f64 {
        -self.fisher_information(theta, params)
    }

    fn fisher_information(&self, theta: f64, params: &ParamVector) -> f64 {
        let Some(cat) = Categories::from_params(params) else {
            return 0.0;
        };
        let probs = cat.probabilities(theta);
        let mean: f64 = probs.iter().enumerate().map(|(h, p)| h as f64 * p).sum();
        let var: f64 = probs
            .iter()
            .enumerate()
            .map(|(h, p)| (h as f64 - mean).powi(2) * p)
            .sum();
        cat.discrimination * cat.discrimination * var
    }

    fn estimate_item_params(
        &self,
        observations: &[Observation],
        previous: Option<&ParamVector>,
    ) -> Estimate {
        if observations.is_empty() {
            return Estimate::NotConverged;
        }

        // Category structure comes from the observed fractions.
        let mut fractions: Vec<f64> = Vec::new();
        for o in observations {
            if o.fraction > 0.0 && !fractions.iter().any(|&f| (f - o.fraction).abs() < 1e-9) {
                fractions.push(o.fraction);
            }
        }
        fractions.sort_by(|x, y| x.partial_cmp(y).unwrap());
        if fractions.is_empty() {
            return Estimate::NotConverged;
        }
        let m = fractions.len();

        // Seed from the previous estimate when its step structure matches.
        let (mut a, mut difficulties) = match previous {
            Some(ParamVector::PartialCredit {
                discrimination,
                steps,
            }) if steps.len() == m => (
                *discrimination,
                steps.iter().map(|s| s.difficulty).collect::<Vec<f64>>(),
            ),
            _ => {
                let base = seed_difficulty(observations);
                (
                    1.0,
                    (0..m)
                        .map(|j| base + 0.25 * (j as f64 - (m as f64 - 1.0) / 2.0))
                        .collect(),
                )
            }
        };

        let mut scratch = Categories {
            fractions: {
                let mut f = vec![0.0];
                f.extend(&fractions);
                f
            },
            difficulties: difficulties.clone(),
            discrimination: a,
        };
        let categories: Vec<usize> = observations
            .iter()
            .map(|o| scratch.category_of(o.fraction))
            .collect();

        for _ in 0..MAX_CYCLES {
            scratch.difficulties.clone_from(&difficulties);
            scratch.discrimination = a;
            let mut max_step: f64 = 0.0;

            // One Fisher-scoring step per step difficulty.
            for j in 1..=m {
                let (mut g, mut h) = (0.0, 0.0);
                for (o, &k) in observations.iter().zip(&categories) {
                    let probs = scratch.probabilities(o.ability);
                    let tail: f64 = probs[j..].iter().sum();
                    let reached = if k >= j { 1.0 } else { 0.0 };
                    g -= a * (reached - tail);
                    h -= a * a * tail * (1.0 - tail);
                }
                if !h.is_finite() || h.abs() < 1e-12 {
                    return Estimate::NotConverged;
                }
                let step = (g / h).clamp(-MAX_NEWTON_STEP, MAX_NEWTON_STEP);
                difficulties[j - 1] -= step;
                scratch.difficulties[j - 1] = difficulties[j - 1];
                max_step = max_step.max(step.abs());
            }

            // Shared discrimination step.
            let (mut g, mut h) = (0.0, 0.0);
            for (o, &k) in observations.iter().zip(&categories) {
                let probs = scratch.probabilities(o.ability);
                // m_h = d(T_h)/d(a) per category.
                let mut acc = 0.0;
                let mut slopes = Vec::with_capacity(m + 1);
                slopes.push(0.0);
                for &b in &difficulties {
                    acc += o.ability - b;
                    slopes.push(acc);
                }
                let mean: f64 = probs.iter().zip(&slopes).map(|(p, s)| p * s).sum();
                let var: f64 = probs
                    .iter()
                    .zip(&slopes)
                    .map(|(p, s)| (s - mean).powi(2) * p)
                    .sum();
                g += slopes[k] - mean;
                h -= var;
            }
            if !h.is_finite() || h.abs() < 1e-12 {
                return Estimate::NotConverged;
            }
            let step = (g / h).clamp(-MAX_NEWTON_STEP, MAX_NEWTON_STEP);
            a = (a - step).clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION);
            max_step = max_step.max(step.abs());

            if max_step < NEWTON_TOL {
                return Estimate::Converged(ParamVector::PartialCredit {
                    discrimination: clamp_to_sentinel(a),
                    steps: fractions
                        .iter()
                        .zip(&difficulties)
                        .map(|(&fraction, &difficulty)| CategoryStep {
                            fraction,
                            difficulty: clamp_to_sentinel(difficulty),
                        })
                        .collect(),
                });
            }
        }

        Estimate::NotConverged
    }
}
