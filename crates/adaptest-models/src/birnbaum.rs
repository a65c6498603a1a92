//! Two- and three-parameter logistic (Birnbaum) models.
//!
//! Discrimination is free; the 3PL variant adds a guessing floor. Item
//! estimation runs Fisher scoring on the (discrimination, difficulty)
//! block, with the 3PL interleaving a bounded one-dimensional step for the
//! guessing parameter.

use adaptest_core::model::{clamp_to_sentinel, Observation, ParamVector};

use crate::math::{clamp_prob, log_sigmoid, sigmoid, MAX_NEWTON_STEP, NEWTON_TOL};
use crate::onepl::seed_difficulty;
use crate::traits::{Estimate, PsychometricModel};

/// Registry name of the two-parameter variant.
pub const NAME_2PL: &str = "2pl";
/// Registry name of the three-parameter variant.
pub const NAME_3PL: &str = "3pl";

const MIN_DISCRIMINATION: f64 = 0.05;
const MAX_DISCRIMINATION: f64 = 25.0;
const MAX_GUESSING: f64 = 0.35;
// The 3PL alternates a 2x2 block with the guessing step, which needs more
// cycles than a joint solve.
const MAX_CYCLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    TwoParam,
    ThreeParam,
}

/// Birnbaum logistic model, 2PL or 3PL.
#[derive(Debug)]
pub struct Birnbaum {
    variant: Variant,
}

impl Birnbaum {
    pub fn two_param() -> Self {
        Self {
            variant: Variant::TwoParam,
        }
    }

    pub fn three_param() -> Self {
        Self {
            variant: Variant::ThreeParam,
        }
    }

    fn unpack(params: &ParamVector) -> (f64, f64, f64) {
        match params {
            ParamVector::Dichotomous {
                difficulty,
                discrimination,
                guessing,
            } => (*difficulty, *discrimination, *guessing),
            // A partial-credit vector has no meaning here; degrade to its
            // summary difficulty with unit discrimination.
            other => (other.difficulty(), 1.0, 0.0),
        }
    }

    /// (p, dp/dtheta) at one observation point.
    fn response_curve(theta: f64, b: f64, a: f64, c: f64) -> (f64, f64) {
        let s = sigmoid(a * (theta - b));
        let p = clamp_prob(c + (1.0 - c) * s);
        let slope = (1.0 - c) * a * s * (1.0 - s);
        (p, slope)
    }
}

impl PsychometricModel for Birnbaum {
    fn name(&self) -> &str {
        match self.variant {
            Variant::TwoParam => NAME_2PL,
            Variant::ThreeParam => NAME_3PL,
        }
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        match self.variant {
            Variant::TwoParam => vec!["difficulty", "discrimination"],
            Variant::ThreeParam => vec!["difficulty", "discrimination", "guessing"],
        }
    }

    fn parameter_count(&self) -> usize {
        match self.variant {
            Variant::TwoParam => 2,
            Variant::ThreeParam => 3,
        }
    }

    fn expected_score(&self, theta: f64, params: &ParamVector) -> f64 {
        let (b, a, c) = Self::unpack(params);
        c + (1.0 - c) * sigmoid(a * (theta - b))
    }

    fn log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        let (b, a, c) = Self::unpack(params);
        if c == 0.0 {
            let z = a * (theta - b);
            fraction * log_sigmoid(z) + (1.0 - fraction) * log_sigmoid(-z)
        } else {
            let p = clamp_prob(c + (1.0 - c) * sigmoid(a * (theta - b)));
            fraction * p.ln() + (1.0 - fraction) * (1.0 - p).ln()
        }
    }

    fn d1_log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        let (b, a, c) = Self::unpack(params);
        let (p, slope) = Self::response_curve(theta, b, a, c);
        (fraction - p) * slope / (p * (1.0 - p))
    }

    fn d2_log_likelihood(&self, theta: f64, params: &ParamVector, fraction: f64) -> f64 {
        let (b, a, c) = Self::unpack(params);
        let s = sigmoid(a * (theta - b));
        let p = clamp_prob(c + (1.0 - c) * s);
        let slope = (1.0 - c) * a * s * (1.0 - s);
        let curvature = (1.0 - c) * a * a * s * (1.0 - s) * (1.0 - 2.0 * s);
        let residual = (fraction - p) / (p * (1.0 - p));
        let spread = fraction / (p * p) + (1.0 - fraction) / ((1.0 - p) * (1.0 - p));
        residual * curvature - slope * slope * spread
    }

    fn fisher_information(&self, theta: f64, params: &ParamVector) -> f64 {
        let (b, a, c) = Self::unpack(params);
        let (p, slope) = Self::response_curve(theta, b, a, c);
        slope * slope / (p * (1.0 - p))
    }

    fn estimate_item_params(
        &self,
        observations: &[Observation],
        previous: Option<&ParamVector>,
    ) -> Estimate {
        // Two free parameters need more than two distinct observations to
        // pin down; fewer cannot identify the slope.
        if observations.len() < 3 {
            return Estimate::NotConverged;
        }

        let (mut b, mut a, mut c) = match previous {
            Some(v) => Self::unpack(v),
            None => (
                seed_difficulty(observations),
                1.0,
                match self.variant {
                    Variant::TwoParam => 0.0,
                    Variant::ThreeParam => 0.1,
                },
            ),
        };
        if self.variant == Variant::TwoParam {
            c = 0.0;
        }

        for _ in 0..MAX_CYCLES {
            // Fisher scoring on (a, b): gradient exact, hessian expected.
            let (mut ga, mut gb, mut haa, mut hab, mut hbb) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for o in observations {
                let s = sigmoid(a * (o.ability - b));
                let p = clamp_prob(c + (1.0 - c) * s);
                let pq = p * (1.0 - p);
                let base = (1.0 - c) * s * (1.0 - s);
                let wa = base * (o.ability - b);
                let wb = -base * a;
                let residual = (o.fraction - p) / pq;
                ga += residual * wa;
                gb += residual * wb;
                haa -= wa * wa / pq;
                hab -= wa * wb / pq;
                hbb -= wb * wb / pq;
            }

            let det = haa * hbb - hab * hab;
            if !det.is_finite() || det.abs() < 1e-12 {
                return Estimate::NotConverged;
            }
            let da = ((ga * hbb - gb * hab) / det).clamp(-MAX_NEWTON_STEP, MAX_NEWTON_STEP);
            let db = ((gb * haa - ga * hab) / det).clamp(-MAX_NEWTON_STEP, MAX_NEWTON_STEP);
            a = (a - da).clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION);
            b -= db;

            // Bounded guessing step for the 3PL.
            let dc = if self.variant == Variant::ThreeParam {
                let (mut gc, mut hcc) = (0.0, 0.0);
                for o in observations {
                    let s = sigmoid(a * (o.ability - b));
                    let p = clamp_prob(c + (1.0 - c) * s);
                    let pq = p * (1.0 - p);
                    let wc = 1.0 - s;
                    gc += (o.fraction - p) / pq * wc;
                    hcc -= wc * wc / pq;
                }
                if !hcc.is_finite() || hcc.abs() < 1e-12 {
                    return Estimate::NotConverged;
                }
                let dc = (gc / hcc).clamp(-MAX_NEWTON_STEP, MAX_NEWTON_STEP);
                c = (c - dc).clamp(0.0, MAX_GUESSING);
                dc
            } else {
                0.0
            };

            if da.abs() < NEWTON_TOL && db.abs() < NEWTON_TOL && dc.abs() < NEWTON_TOL {
                return Estimate::Converged(ParamVector::Dichotomous {
                    difficulty: clamp_to_sentinel(b),
                    discrimination: clamp_to_sentinel(a),
                    guessing: c,
                });
            }
        }

        Estimate::NotConverged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(ability: f64, fraction: f64) -> Observation {
        Observation { ability, fraction }
    }

    fn dichotomous(b: f64, a: f64, c: f64) -> ParamVector {
        ParamVector::Dichotomous {
            difficulty: b,
            discrimination: a,
            guessing: c,
        }
    }

    #[test]
    fn names_and_parameter_counts() {
        assert_eq!(Birnbaum::two_param().name(), "2pl");
        assert_eq!(Birnbaum::three_param().name(), "3pl");
        assert_eq!(Birnbaum::two_param().parameter_count(), 2);
        assert_eq!(Birnbaum::three_param().parameter_count(), 3);
    }

    #[test]
    fn guessing_floor_raises_low_tail() {
        let model = Birnbaum::three_param();
        let p = model.expected_score(-10.0, &dichotomous(0.0, 1.5, 0.2));
        assert!((p - 0.2).abs() < 1e-3, "low tail should approach floor, got {p}");
    }

    #[test]
    fn two_pl_information_scales_with_discrimination_squared() {
        let model = Birnbaum::two_param();
        let weak = model.fisher_information(0.0, &dichotomous(0.0, 1.0, 0.0));
        let strong = model.fisher_information(0.0, &dichotomous(0.0, 2.0, 0.0));
        assert!((strong / weak - 4.0).abs() < 1e-9);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let eps = 1e-6;
        for model in [Birnbaum::two_param(), Birnbaum::three_param()] {
            let params = dichotomous(0.3, 1.4, if model.parameter_count() == 3 { 0.15 } else { 0.0 });
            for &(theta, u) in &[(0.0, 1.0), (1.2, 0.0), (-0.7, 0.5)] {
                let d1 = model.d1_log_likelihood(theta, &params, u);
                let n1 = (model.log_likelihood(theta + eps, &params, u)
                    - model.log_likelihood(theta - eps, &params, u))
                    / (2.0 * eps);
                assert!((d1 - n1).abs() < 1e-5, "{} d1 theta={theta}", model.name());

                let d2 = model.d2_log_likelihood(theta, &params, u);
                let n2 = (model.d1_log_likelihood(theta + eps, &params, u)
                    - model.d1_log_likelihood(theta - eps, &params, u))
                    / (2.0 * eps);
                assert!((d2 - n2).abs() < 1e-4, "{} d2 theta={theta}", model.name());
            }
        }
    }

    #[test]
    fn two_pl_recovers_generating_parameters() {
        let model = Birnbaum::two_param();
        let (true_a, true_b) = (1.8, -0.4);
        let mut observations = Vec::new();
        for &theta in &[-2.0, -1.5, -1.0, -0.5, 0.0, 0.5, 1.0, 1.5, 2.0] {
            let p = sigmoid(true_a * (theta - true_b));
            observations.push(obs(theta, p));
        }
        let estimate = model.estimate_item_params(&observations, None);
        let v = estimate.converged().expect("should converge");
        assert!((v.difficulty() - true_b).abs() < 1e-2, "b={}", v.difficulty());
        assert!(
            (v.discrimination() - true_a).abs() < 5e-2,
            "a={}",
            v.discrimination()
        );
    }

    #[test]
    fn too_few_observations_do_not_converge() {
        let model = Birnbaum::two_param();
        let observations = [obs(0.0, 1.0), obs(1.0, 0.0)];
        assert_eq!(
            model.estimate_item_params(&observations, None),
            Estimate::NotConverged
        );
    }

    #[test]
    fn degenerate_observations_do_not_converge() {
        // All examinees at one ability with one shared fraction leave the
        // slope unidentified.
        let model = Birnbaum::two_param();
        let observations = [obs(0.0, 1.0), obs(0.0, 1.0), obs(0.0, 1.0), obs(0.0, 1.0)];
        assert_eq!(
            model.estimate_item_params(&observations, None),
            Estimate::NotConverged
        );
    }
}
