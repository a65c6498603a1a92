//! Quiz configuration snapshot and engine mode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Immutable quiz configuration, captured once at attempt start.
///
/// The snapshot is frozen into the attempt so that mid-attempt
/// administrative changes never alter a running test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizConfig {
    /// Hard ceiling on served items per attempt.
    pub max_items: u32,
    /// Minimum items before precision-based stopping applies.
    #[serde(default)]
    pub min_items: u32,
    /// Floor of items served per subscale; scales under their floor are
    /// preferred during selection. 0 disables the bound.
    #[serde(default)]
    pub min_items_per_subscale: u32,
    /// Ceiling on items served per subscale; 0 disables the bound.
    #[serde(default)]
    pub max_items_per_subscale: u32,
    /// Stop once the ability standard error drops to this value.
    pub target_standard_error: f64,
    /// Share of serves that inject an uncalibrated pilot item, in `[0, 1]`.
    #[serde(default)]
    pub pilot_ratio: f64,
    /// Length of a forced break in seconds.
    #[serde(default = "default_break_secs")]
    pub break_duration_secs: u64,
    /// Selection strategy identifier.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Pin item parameters to one model instead of per-item winners.
    #[serde(default)]
    pub model_override: Option<String>,
}

fn default_break_secs() -> u64 {
    300
}

fn default_strategy() -> String {
    "maximum_information".to_string()
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            max_items: 20,
            min_items: 3,
            min_items_per_subscale: 0,
            max_items_per_subscale: 0,
            target_standard_error: 0.35,
            pilot_ratio: 0.0,
            break_duration_secs: default_break_secs(),
            strategy: default_strategy(),
            model_override: None,
        }
    }
}

/// Governs the fault-versus-fallback divergence of the engines.
///
/// `Development` raises configuration and integrity faults loudly;
/// `Production` degrades to the documented fallback (for example, a dangling
/// model override falls back to automatic selection) with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Development,
    Production,
}

impl EngineMode {
    pub fn is_development(self) -> bool {
        matches!(self, EngineMode::Development)
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Development => write!(f, "development"),
            EngineMode::Production => write!(f, "production"),
        }
    }
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(EngineMode::Development),
            "production" | "prod" => Ok(EngineMode::Production),
            other => Err(format!("unknown engine mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_config_defaults() {
        let config = QuizConfig::default();
        assert_eq!(config.max_items, 20);
        assert_eq!(config.min_items, 3);
        assert_eq!(config.pilot_ratio, 0.0);
        assert!(config.model_override.is_none());
    }

    #[test]
    fn quiz_config_serde_roundtrip() {
        let config = QuizConfig {
            max_items: 30,
            min_items: 5,
            min_items_per_subscale: 1,
            max_items_per_subscale: 10,
            target_standard_error: 0.3,
            pilot_ratio: 0.1,
            break_duration_secs: 600,
            strategy: "maximum_information".into(),
            model_override: Some("2pl".into()),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: QuizConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn engine_mode_parse() {
        assert_eq!("dev".parse::<EngineMode>().unwrap(), EngineMode::Development);
        assert_eq!(
            "Production".parse::<EngineMode>().unwrap(),
            EngineMode::Production
        );
        assert!("staging".parse::<EngineMode>().is_err());
    }
}
