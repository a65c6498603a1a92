//! Engine configuration loading.
//!
//! Search order: `adaptest.toml` in the current directory, then
//! `~/.config/adaptest/config.toml`, then built-in defaults. Environment
//! variables override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use adaptest_core::config::EngineMode;

/// Top-level adaptest engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fault-versus-fallback behavior; see [`EngineMode`].
    #[serde(default = "default_mode")]
    pub mode: EngineMode,
    /// Calibration rounds per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Explicit opt-in for early calibration stopping.
    #[serde(default)]
    pub convergence_threshold: Option<f64>,
    /// Information criterion for model selection ("aic" or "bic").
    #[serde(default = "default_criterion")]
    pub criterion: String,
    /// Maximum concurrent estimation tasks.
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Models enabled for calibration, in tie-breaking order.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
}

fn default_mode() -> EngineMode {
    EngineMode::Production
}
fn default_max_iterations() -> usize {
    5
}
fn default_criterion() -> String {
    "aic".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_models() -> Vec<String> {
    vec!["1pl".into(), "2pl".into(), "3pl".into(), "pcm".into()]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            max_iterations: default_max_iterations(),
            convergence_threshold: None,
            criterion: default_criterion(),
            max_concurrency: default_concurrency(),
            models: default_models(),
        }
    }
}

/// Load configuration from the well-known paths.
pub fn load_config() -> Result<EngineConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<EngineConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("adaptest.toml");
        if local.exists() {
            Some(local)
        } else if let Some(dir) = config_dir() {
            let global = dir.join("config.toml");
            global.exists().then_some(global)
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<EngineConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    // Environment overrides.
    if let Ok(mode) = std::env::var("ADAPTEST_MODE") {
        config.mode = mode
            .parse()
            .map_err(|e: String| anyhow::anyhow!("ADAPTEST_MODE: {e}"))?;
    }
    if let Ok(concurrency) = std::env::var("ADAPTEST_MAX_CONCURRENCY") {
        config.max_concurrency = concurrency
            .parse()
            .context("ADAPTEST_MAX_CONCURRENCY must be an integer")?;
    }

    Ok(config)
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("adaptest"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.mode, EngineMode::Production);
        assert_eq!(config.max_iterations, 5);
        assert!(config.convergence_threshold.is_none());
        assert_eq!(config.models.len(), 4);
    }

    #[test]
    fn parse_partial_file_fills_defaults() {
        let toml_str = r#"
mode = "development"
max_iterations = 3
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mode, EngineMode::Development);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.criterion, "aic");
    }

    #[test]
    fn load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adaptest.toml");
        std::fs::write(&path, "criterion = \"bic\"\nmax_concurrency = 8\n").unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.criterion, "bic");
        assert_eq!(config.max_concurrency, 8);
    }

    #[test]
    fn missing_explicit_path_fails() {
        assert!(load_config_from(Some(Path::new("/nonexistent/adaptest.toml"))).is_err());
    }

    #[test]
    fn malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "mode = [not valid").unwrap();
        assert!(load_config_from(Some(&path)).is_err());
    }
}
