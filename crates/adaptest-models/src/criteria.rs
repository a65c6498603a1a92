//! Information criteria for per-item model selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Model-selection statistic trading fit against parameter count.
/// Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationCriterion {
    Aic,
    Bic,
}

impl InformationCriterion {
    /// Evaluate the criterion from a summed log-likelihood, the number of
    /// estimated parameters `k`, and the number of observations `n`.
    pub fn evaluate(self, log_likelihood: f64, k: usize, n: usize) -> f64 {
        match self {
            InformationCriterion::Aic => 2.0 * k as f64 - 2.0 * log_likelihood,
            InformationCriterion::Bic => {
                (n.max(1) as f64).ln() * k as f64 - 2.0 * log_likelihood
            }
        }
    }
}

impl Default for InformationCriterion {
    fn default() -> Self {
        InformationCriterion::Aic
    }
}

impl fmt::Display for InformationCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InformationCriterion::Aic => write!(f, "aic"),
            InformationCriterion::Bic => write!(f, "bic"),
        }
    }
}

impl FromStr for InformationCriterion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aic" => Ok(InformationCriterion::Aic),
            "bic" => Ok(InformationCriterion::Bic),
            other => Err(format!("unknown information criterion: {other}")),
        }
    }
}
