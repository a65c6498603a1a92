//! `adaptest simulate` — run one adaptive attempt against a calibrated
//! pool with a simulated examinee.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use uuid::Uuid;

use adaptest_core::config::QuizConfig;
use adaptest_core::scale::{ScaleEdge, ScaleHierarchy};
use adaptest_core::traits::AttemptStore;
use adaptest_models::{ModelRegistry, PsychometricModel as _};
use adaptest_runtime::{AttemptService, CandidateItem, ServeOutcome, ServeRequest};
use adaptest_store::{MemoryActivityLog, MemoryAttemptStore, MemoryProgressCache};

pub async fn execute(
    pool: PathBuf,
    true_theta: f64,
    max_items: u32,
    target_se: f64,
    pilot_ratio: f64,
    seed: u64,
) -> Result<()> {
    let content = std::fs::read_to_string(&pool)
        .with_context(|| format!("failed to read pool: {}", pool.display()))?;
    let candidates: Vec<CandidateItem> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse pool: {}", pool.display()))?;
    if candidates.is_empty() {
        anyhow::bail!("item pool is empty: {}", pool.display());
    }

    // A flat one-scale hierarchy covering every scale id in the pool.
    let mut edges = vec![ScaleEdge {
        scale: candidates[0].scale,
        parent: None,
    }];
    let root = candidates[0].scale;
    for c in &candidates {
        if c.scale != root && !edges.iter().any(|e| e.scale == c.scale) {
            edges.push(ScaleEdge {
                scale: c.scale,
                parent: Some(root),
            });
        }
    }
    let hierarchy = ScaleHierarchy::from_edges(&edges)?;

    let registry = Arc::new(ModelRegistry::with_defaults());
    let attempts = Arc::new(MemoryAttemptStore::new());
    let cache = Arc::new(MemoryProgressCache::new());
    let activity = Arc::new(MemoryActivityLog::new());
    let service = AttemptService::new(
        Arc::clone(&attempts) as _,
        Arc::clone(&cache) as _,
        Arc::clone(&activity) as _,
        Arc::clone(&registry),
    );

    let quiz_config = QuizConfig {
        max_items,
        target_standard_error: target_se,
        pilot_ratio,
        ..QuizConfig::default()
    };

    let attempt = Uuid::new_v4();
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut token = None;
    let mut step = 0u32;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Step", "Item", "Info", "Response", "Ability", "SE",
    ]);

    let stop_reason = loop {
        let request = ServeRequest {
            attempt,
            examinee: 1,
            context: 1,
            session_token: token,
        };
        let result = service
            .serve_next(&request, &quiz_config, &hierarchy, candidates.clone(), root)
            .await?;
        token = Some(result.session_token);

        match result.outcome {
            ServeOutcome::Item(selection) => {
                step += 1;
                let candidate = candidates
                    .iter()
                    .find(|c| c.item == selection.item)
                    .expect("selected item is in the pool");
                let model = registry.require(&candidate.model)?;
                let p = model.expected_score(true_theta, &candidate.values);
                let fraction = if rng.gen::<f64>() < p { 1.0 } else { 0.0 };
                activity.record_response(attempt, selection.item, fraction).await;

                let snapshot = attempts
                    .load(attempt)
                    .await?
                    .context("attempt snapshot missing mid-simulation")?;
                let ability = snapshot.abilities.get(&root).copied().unwrap_or(0.0);
                let se = snapshot
                    .played
                    .iter()
                    .map(|p| p.fisher_information)
                    .sum::<f64>();
                let se = if se > 0.0 {
                    format!("{:.3}", 1.0 / se.sqrt())
                } else {
                    "-".to_string()
                };
                table.add_row(vec![
                    Cell::new(step),
                    Cell::new(selection.item),
                    Cell::new(format!("{:.3}", selection.fisher_information)),
                    Cell::new(if fraction > 0.5 { "correct" } else { "wrong" }),
                    Cell::new(format!("{ability:+.3}")),
                    Cell::new(se),
                ]);
            }
            ServeOutcome::Stop(reason) => break reason,
            ServeOutcome::OnBreak { until } => {
                anyhow::bail!("unexpected break until {until} during simulation")
            }
        }
    };

    println!("{table}");
    println!("Simulated examinee with true ability {true_theta:+.2}");
    println!("Stopped after {step} items: {stop_reason}");
    Ok(())
}
