//! `adaptest calibrate` — run the calibration loop over a response file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};

use adaptest_core::model::{PersonParamList, Response, ResponseMatrix};
use adaptest_core::scale::{ScaleEdge, ScaleHierarchy};
use adaptest_models::{
    CalibrationSettings, CalibrationStrategy, InformationCriterion, ModelRegistry,
};
use adaptest_store::load_config_from;

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    responses: PathBuf,
    scales: Option<PathBuf>,
    models: Option<String>,
    max_iterations: Option<usize>,
    convergence_threshold: Option<f64>,
    criterion: Option<String>,
    mode: Option<String>,
    context: u64,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<()> {
    let engine_config = load_config_from(config.as_deref())?;

    let content = std::fs::read_to_string(&responses)
        .with_context(|| format!("failed to read responses: {}", responses.display()))?;
    let rows: Vec<Response> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse responses: {}", responses.display()))?;
    let matrix = ResponseMatrix::from_responses(rows);
    if matrix.is_empty() {
        anyhow::bail!("no scorable responses in {}", responses.display());
    }

    let hierarchy = match &scales {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read scales: {}", path.display()))?;
            let edges: Vec<ScaleEdge> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse scales: {}", path.display()))?;
            Some(ScaleHierarchy::from_edges(&edges)?)
        }
        None => None,
    };

    let model_names: Vec<String> = models
        .map(|m| m.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|| engine_config.models.clone());
    let registry = Arc::new(ModelRegistry::with_defaults().restricted_to(&model_names)?);

    let criterion: InformationCriterion = criterion
        .unwrap_or(engine_config.criterion)
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let mode = match mode {
        Some(m) => m.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => engine_config.mode,
    };

    let settings = CalibrationSettings {
        max_iterations: max_iterations.unwrap_or(engine_config.max_iterations),
        convergence_threshold: convergence_threshold.or(engine_config.convergence_threshold),
        criterion,
        mode,
        concurrency: engine_config.max_concurrency,
        overrides: Default::default(),
    };

    let strategy = CalibrationStrategy::new(registry, settings);
    let outcome = strategy
        .run_estimation(
            context,
            &matrix,
            PersonParamList::new(),
            None,
            hierarchy.as_ref(),
        )
        .await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Item",
        "Model",
        "Difficulty",
        "Discrimination",
        "Status",
    ]);
    for params in outcome.merged.iter() {
        table.add_row(vec![
            Cell::new(params.item),
            Cell::new(&params.model),
            Cell::new(format!("{:+.3}", params.values.difficulty())),
            Cell::new(format!("{:.3}", params.values.discrimination())),
            Cell::new(params.status.to_string()),
        ]);
    }
    println!("{table}");
    println!(
        "Calibrated {} items over {} iterations ({} examinees, {} dropped items)",
        outcome.merged.len(),
        outcome.iterations_run,
        outcome.abilities.len(),
        outcome.dropped_items.len()
    );

    if let Some(dir) = output {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
        let items_path = dir.join("item_params.json");
        std::fs::write(&items_path, serde_json::to_string_pretty(&outcome.merged)?)
            .with_context(|| format!("failed to write {}", items_path.display()))?;
        let persons_path = dir.join("person_params.json");
        std::fs::write(
            &persons_path,
            serde_json::to_string_pretty(&outcome.abilities)?,
        )
        .with_context(|| format!("failed to write {}", persons_path.display()))?;
        println!("Wrote {}", items_path.display());
        println!("Wrote {}", persons_path.display());
    }

    Ok(())
}
