//! `adaptest validate` — sanity-check an item pool file.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};

use adaptest_core::model::ParamVector;
use adaptest_models::ModelRegistry;
use adaptest_runtime::CandidateItem;

pub fn execute(pool: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&pool)
        .with_context(|| format!("failed to read pool: {}", pool.display()))?;
    let candidates: Vec<CandidateItem> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse pool: {}", pool.display()))?;

    let registry = ModelRegistry::with_defaults();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for candidate in &candidates {
        if !seen.insert(candidate.item) {
            warnings.push(format!("duplicate item id: {}", candidate.item));
        }
        if registry.get(&candidate.model).is_none() {
            warnings.push(format!(
                "item {}: unknown model '{}'",
                candidate.item, candidate.model
            ));
        }
        match &candidate.values {
            ParamVector::Dichotomous {
                discrimination,
                guessing,
                ..
            } => {
                if *discrimination <= 0.0 {
                    warnings.push(format!(
                        "item {}: non-positive discrimination {discrimination}",
                        candidate.item
                    ));
                }
                if !(0.0..1.0).contains(guessing) {
                    warnings.push(format!(
                        "item {}: guessing {guessing} outside [0, 1)",
                        candidate.item
                    ));
                }
            }
            ParamVector::PartialCredit {
                discrimination,
                steps,
            } => {
                if *discrimination <= 0.0 {
                    warnings.push(format!(
                        "item {}: non-positive discrimination {discrimination}",
                        candidate.item
                    ));
                }
                if steps.is_empty() {
                    warnings.push(format!("item {}: no category steps", candidate.item));
                }
                let mut last = 0.0;
                for step in steps {
                    if step.fraction <= last || step.fraction > 1.0 {
                        warnings.push(format!(
                            "item {}: step fractions must be ascending in (0, 1], got {}",
                            candidate.item, step.fraction
                        ));
                        break;
                    }
                    last = step.fraction;
                }
            }
        }
    }

    let pilots = candidates.iter().filter(|c| c.pilot).count();
    println!(
        "{}: {} items ({} pilot)",
        pool.display(),
        candidates.len(),
        pilots
    );

    if warnings.is_empty() {
        println!("Pool is valid");
        Ok(())
    } else {
        for warning in &warnings {
            println!("warning: {warning}");
        }
        anyhow::bail!("{} validation issue(s) found", warnings.len());
    }
}
