//! Error taxonomy and stop reasons.
//!
//! Faults are `CatError` values. Recoverable flow control — an exhausted
//! candidate pool, a reached precision target, a non-converged optimization —
//! is *not* an error: those outcomes travel as `StopReason` or as estimate
//! statuses inside `Ok` values, and callers render a graceful stop.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ContextId;

/// Faults raised by the calibration and runtime engines.
#[derive(Debug, Error)]
pub enum CatError {
    /// Unknown model name, dangling override, malformed engine settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A referenced row or mapping does not exist.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// A runtime request carried a stale or foreign session token.
    #[error("session token mismatch for attempt {attempt}")]
    SessionMismatch { attempt: Uuid },

    /// A calibration run is already active for this context.
    #[error("calibration already running for context {0}")]
    CalibrationBusy(ContextId),
}

/// Why the adaptive runtime stopped serving items.
///
/// Surfaced as a structured outcome, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The accumulated Fisher information pushed the standard error below
    /// the configured target.
    TargetPrecisionReached,
    /// The configured maximum item count was served.
    MaxItemsReached,
    /// No candidate items remain for the active scales.
    ExhaustedCandidates,
    /// Every active scale reached its subscale ceiling.
    NoActiveScales,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetPrecisionReached => write!(f, "target precision reached"),
            StopReason::MaxItemsReached => write!(f, "maximum item count reached"),
            StopReason::ExhaustedCandidates => write!(f, "no candidate items remain"),
            StopReason::NoActiveScales => write!(f, "no active scales remain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_serde_uses_snake_case() {
        let json = serde_json::to_string(&StopReason::ExhaustedCandidates).unwrap();
        assert_eq!(json, "\"exhausted_candidates\"");
        let back: StopReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StopReason::ExhaustedCandidates);
    }

    #[test]
    fn errors_render_context() {
        let e = CatError::CalibrationBusy(7);
        assert!(e.to_string().contains("context 7"));
    }
}
