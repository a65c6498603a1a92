//! adaptest-models — Psychometric model family and calibration.
//!
//! Implements the IRT model variants (1PL, 2PL/3PL Birnbaum, partial
//! credit), maximum-likelihood ability estimation, per-item model selection
//! via information criteria, and the joint calibration loop.

pub mod ability;
pub mod birnbaum;
pub mod calibration;
pub mod criteria;
pub mod math;
pub mod onepl;
pub mod partial_credit;
pub mod registry;
pub mod traits;

pub use ability::AbilityEstimator;
pub use calibration::{CalibrationOutcome, CalibrationSettings, CalibrationStrategy};
pub use criteria::InformationCriterion;
pub use registry::ModelRegistry;
pub use traits::{Estimate, PsychometricModel};
