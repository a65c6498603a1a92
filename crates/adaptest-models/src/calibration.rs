//! Joint item/ability calibration.
//!
//! Alternates per-item parameter estimation across every installed model
//! with full ability re-estimation, selecting a winning model per item via
//! an information criterion. The loop runs a fixed number of iterations;
//! there is deliberately no implicit early-convergence check (see
//! `convergence_threshold` for the explicit opt-in).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use adaptest_core::config::EngineMode;
use adaptest_core::error::CatError;
use adaptest_core::model::{
    ItemParamList, ItemParameters, ItemStatus, PersonParamList, ResponseMatrix,
};
use adaptest_core::scale::ScaleHierarchy;
use adaptest_core::traits::ParameterStore;
use adaptest_core::{ContextId, ItemId};

use crate::ability::AbilityEstimator;
use crate::criteria::InformationCriterion;
use crate::registry::ModelRegistry;
use crate::traits::{Estimate, PsychometricModel};

/// List name under which merged winning parameters and final abilities are
/// persisted.
pub const MERGED_MODEL: &str = "merged";

/// Tunables of one calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationSettings {
    /// Alternating estimation rounds. The loop always runs this many
    /// iterations unless `convergence_threshold` is set.
    pub max_iterations: usize,
    /// Explicit opt-in: stop early once the largest absolute ability change
    /// between rounds drops below this threshold.
    pub convergence_threshold: Option<f64>,
    /// Statistic used for per-item model selection.
    pub criterion: InformationCriterion,
    /// Governs whether a dangling override raises or degrades.
    pub mode: EngineMode,
    /// Maximum concurrent per-item estimation tasks.
    pub concurrency: usize,
    /// Per-item overrides pinning an item to a specific model.
    pub overrides: BTreeMap<ItemId, String>,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            convergence_threshold: None,
            criterion: InformationCriterion::default(),
            mode: EngineMode::Production,
            concurrency: 4,
            overrides: BTreeMap::new(),
        }
    }
}

/// Everything one calibration run produced.
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    /// Item parameter lists per model, all candidates included.
    pub per_model: BTreeMap<String, ItemParamList>,
    /// Winning parameters per item, tagged `SetByStrategy`.
    pub merged: ItemParamList,
    /// Final ability estimates.
    pub abilities: PersonParamList,
    /// Winning model per item.
    pub winners: BTreeMap<ItemId, String>,
    /// Items dropped from the matrix as unscorable.
    pub dropped_items: BTreeSet<ItemId>,
    /// Rounds actually run.
    pub iterations_run: usize,
}

/// Per-context exclusion of concurrent calibration runs.
#[derive(Debug, Default)]
pub struct CalibrationLocks {
    active: Mutex<BTreeSet<ContextId>>,
}

impl CalibrationLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn acquire(self: &Arc<Self>, context: ContextId) -> Result<CalibrationLockGuard, CatError> {
        let mut active = self.active.lock().expect("lock poisoned");
        if !active.insert(context) {
            return Err(CatError::CalibrationBusy(context));
        }
        Ok(CalibrationLockGuard {
            locks: Arc::clone(self),
            context,
        })
    }
}

struct CalibrationLockGuard {
    locks: Arc<CalibrationLocks>,
    context: ContextId,
}

impl Drop for CalibrationLockGuard {
    fn drop(&mut self) {
        self.locks
            .active
            .lock()
            .expect("lock poisoned")
            .remove(&self.context);
    }
}

/// The alternating item/ability estimation loop.
pub struct CalibrationStrategy {
    registry: Arc<ModelRegistry>,
    estimator: AbilityEstimator,
    settings: CalibrationSettings,
    locks: Arc<CalibrationLocks>,
}

impl CalibrationStrategy {
    pub fn new(registry: Arc<ModelRegistry>, settings: CalibrationSettings) -> Self {
        let estimator = AbilityEstimator::default().with_concurrency(settings.concurrency);
        Self {
            registry,
            estimator,
            settings,
            locks: CalibrationLocks::new(),
        }
    }

    /// Share a lock table across strategies operating on the same store.
    pub fn with_locks(mut self, locks: Arc<CalibrationLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Run the full calibration for one context.
    ///
    /// `seed_abilities` seeds the first round; `previous` optionally seeds
    /// item estimation with a prior context's parameters.
    pub async fn run_estimation(
        &self,
        context: ContextId,
        matrix: &ResponseMatrix,
        seed_abilities: PersonParamList,
        previous: Option<&BTreeMap<String, ItemParamList>>,
        hierarchy: Option<&ScaleHierarchy>,
    ) -> Result<CalibrationOutcome, CatError> {
        let _guard = self.locks.acquire(context)?;

        tracing::info!(
            context,
            items = matrix.item_count(),
            examinees = matrix.examinee_count(),
            iterations = self.settings.max_iterations,
            "starting calibration"
        );

        let mut abilities = seed_abilities;
        let mut per_model: BTreeMap<String, ItemParamList> = BTreeMap::new();
        let mut merged = ItemParamList::new(MERGED_MODEL);
        let mut winners = BTreeMap::new();
        let mut iterations_run = 0;

        for round in 0..self.settings.max_iterations {
            iterations_run = round + 1;

            for model in self.registry.enabled() {
                let seed_list = per_model
                    .get(model.name())
                    .or_else(|| previous.and_then(|p| p.get(model.name())));
                let list = self
                    .estimate_model_items(model.as_ref(), matrix, &abilities, seed_list)
                    .await;
                per_model.insert(model.name().to_string(), list);
            }

            (merged, winners) = self.select_winners(matrix, &abilities, &per_model)?;

            let next = self
                .estimator
                .estimate(matrix, &merged, &self.registry, &abilities, hierarchy)
                .await?;

            if let Some(threshold) = self.settings.convergence_threshold {
                let delta = max_ability_delta(&abilities, &next);
                abilities = next;
                if delta < threshold {
                    tracing::debug!(round, delta, "ability change below threshold, stopping");
                    break;
                }
            } else {
                abilities = next;
            }
        }

        // Winner rows carry their status inside their model's list as well.
        for (item, model_name) in &winners {
            if let Some(list) = per_model.get_mut(model_name) {
                if let Some(row) = list.get(*item).cloned() {
                    list.insert(ItemParameters {
                        status: ItemStatus::SetByStrategy,
                        ..row
                    });
                }
            }
        }

        tracing::info!(
            context,
            iterations_run,
            calibrated = merged.len(),
            "calibration finished"
        );

        Ok(CalibrationOutcome {
            per_model,
            merged,
            abilities,
            winners,
            dropped_items: matrix.dropped_items().clone(),
            iterations_run,
        })
    }

    /// Persist a calibration outcome through the parameter store: every
    /// candidate list, the merged winners, and the final abilities.
    pub async fn persist(
        &self,
        store: &dyn ParameterStore,
        context: ContextId,
        outcome: &CalibrationOutcome,
    ) -> anyhow::Result<()> {
        for list in outcome.per_model.values() {
            store.upsert_item_params(context, list).await?;
        }
        store.upsert_item_params(context, &outcome.merged).await?;
        store
            .upsert_person_params(context, MERGED_MODEL, &outcome.abilities)
            .await?;
        Ok(())
    }

    async fn estimate_model_items(
        &self,
        model: &dyn PsychometricModel,
        matrix: &ResponseMatrix,
        abilities: &PersonParamList,
        seed_list: Option<&ItemParamList>,
    ) -> ItemParamList {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut futures = FuturesUnordered::new();

        for item in matrix.item_ids() {
            let semaphore = Arc::clone(&semaphore);
            futures.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let observations = matrix.item_observations(item, abilities);
                let seed = seed_list.and_then(|l| l.get(item)).map(|r| &r.values);
                (item, model.estimate_item_params(&observations, seed))
            });
        }

        let mut list = ItemParamList::new(model.name());
        while let Some((item, estimate)) = futures.next().await {
            match estimate {
                Estimate::Converged(values) => list.insert(ItemParameters {
                    item,
                    model: model.name().to_string(),
                    values,
                    status: ItemStatus::NotSet,
                    metadata: BTreeMap::new(),
                }),
                Estimate::NotConverged => {
                    // The seed stays the best available estimate: keep it,
                    // flagged as not calculated. Items with no prior
                    // estimate have produced no data and stay absent.
                    if let Some(prev) = seed_list.and_then(|l| l.get(item)) {
                        list.insert(ItemParameters {
                            status: ItemStatus::NotCalculated,
                            ..prev.clone()
                        });
                    } else {
                        tracing::debug!(item, model = model.name(), "estimation did not converge");
                    }
                }
            }
        }
        list
    }

    fn select_winners(
        &self,
        matrix: &ResponseMatrix,
        abilities: &PersonParamList,
        per_model: &BTreeMap<String, ItemParamList>,
    ) -> Result<(ItemParamList, BTreeMap<ItemId, String>), CatError> {
        let mut merged = ItemParamList::new(MERGED_MODEL);
        let mut winners = BTreeMap::new();

        for item in matrix.item_ids() {
            let chosen = match self.override_winner(item, per_model)? {
                Some(name) => Some(name),
                None => self.auto_winner(item, matrix, abilities, per_model),
            };

            if let Some(model_name) = chosen {
                let row = per_model
                    .get(&model_name)
                    .and_then(|l| l.get(item))
                    .expect("winner has a row")
                    .clone();
                merged.insert(ItemParameters {
                    status: ItemStatus::SetByStrategy,
                    ..row
                });
                winners.insert(item, model_name);
            }
        }

        Ok((merged, winners))
    }

    /// Resolve an explicit per-item override, if configured.
    fn override_winner(
        &self,
        item: ItemId,
        per_model: &BTreeMap<String, ItemParamList>,
    ) -> Result<Option<String>, CatError> {
        let Some(name) = self.settings.overrides.get(&item) else {
            return Ok(None);
        };
        // An unknown model name is a configuration fault in every mode.
        self.registry.require(name)?;

        let has_data = per_model.get(name).is_some_and(|l| l.contains(item));
        if has_data {
            return Ok(Some(name.clone()));
        }

        if self.settings.mode.is_development() {
            return Err(CatError::Configuration(format!(
                "override for item {item} points to model {name} with no data"
            )));
        }
        tracing::warn!(
            item,
            model = name.as_str(),
            "override points to model with no data, falling back to automatic selection"
        );
        Ok(None)
    }

    /// Minimum-information-criterion winner across models that produced
    /// data for the item. Ties keep the earlier-registered model.
    fn auto_winner(
        &self,
        item: ItemId,
        matrix: &ResponseMatrix,
        abilities: &PersonParamList,
        per_model: &BTreeMap<String, ItemParamList>,
    ) -> Option<String> {
        let observations = matrix.item_observations(item, abilities);
        if observations.is_empty() {
            return None;
        }

        let mut candidates = Vec::new();
        for model in self.registry.enabled() {
            // Any present row counts as data, including a carried-over
            // estimate whose last refinement round did not converge.
            let Some(row) = per_model.get(model.name()).and_then(|l| l.get(item)) else {
                continue;
            };
            let log_likelihood: f64 = observations
                .iter()
                .map(|o| model.log_likelihood(o.ability, &row.values, o.fraction))
                .sum();
            let k = model.parameter_count_for(&row.values);
            let value = self
                .settings
                .criterion
                .evaluate(log_likelihood, k, observations.len());
            candidates.push((model.name().to_string(), value));
        }

        best_by_criterion(candidates)
    }
}

/// Strictly-less comparison over (model, criterion value) pairs; on ties
/// the earlier entry wins.
fn best_by_criterion(candidates: Vec<(String, f64)>) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    for (name, value) in candidates {
        if !value.is_finite() {
            continue;
        }
        match &best {
            Some((_, best_value)) if value >= *best_value => {}
            _ => best = Some((name, value)),
        }
    }
    best.map(|(name, _)| name)
}

/// Largest absolute ability change between two estimates.
fn max_ability_delta(before: &PersonParamList, after: &PersonParamList) -> f64 {
    let mut delta: f64 = 0.0;
    for entry in after.iter() {
        let prev = before.ability(entry.examinee, entry.scale);
        delta = delta.max((entry.ability - prev).abs());
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptest_core::model::Response;

    fn resp(examinee: u64, item: ItemId, fraction: f64) -> Response {
        Response {
            examinee,
            item,
            scale: 1,
            fraction,
        }
    }

    /// 3 examinees, 2 items: item 10 answered correctly by 2 of 3, item 11
    /// by 1 of 3.
    fn two_item_matrix() -> ResponseMatrix {
        ResponseMatrix::from_responses(vec![
            resp(1, 10, 1.0),
            resp(2, 10, 1.0),
            resp(3, 10, 0.0),
            resp(1, 11, 1.0),
            resp(2, 11, 0.0),
            resp(3, 11, 0.0),
        ])
    }

    fn rasch_only() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::with_defaults()
                .restricted_to(&["1pl".to_string()])
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn run_covers_all_items_and_examinees() {
        let strategy = CalibrationStrategy::new(rasch_only(), CalibrationSettings::default());
        let matrix = two_item_matrix();

        let outcome = strategy
            .run_estimation(1, &matrix, PersonParamList::new(), None, None)
            .await
            .unwrap();

        assert_eq!(outcome.iterations_run, 5);
        assert!(outcome.merged.contains(10));
        assert!(outcome.merged.contains(11));
        for examinee in [1, 2, 3] {
            assert!(
                outcome.abilities.get(examinee, 1).is_some(),
                "missing ability for examinee {examinee}"
            );
        }
    }

    #[tokio::test]
    async fn harder_item_gets_higher_difficulty() {
        let strategy = CalibrationStrategy::new(rasch_only(), CalibrationSettings::default());
        let matrix = two_item_matrix();

        let outcome = strategy
            .run_estimation(1, &matrix, PersonParamList::new(), None, None)
            .await
            .unwrap();

        let easy = outcome.merged.get(10).unwrap().values.difficulty();
        let hard = outcome.merged.get(11).unwrap().values.difficulty();
        assert!(hard > easy, "expected item 11 harder: easy={easy} hard={hard}");
        assert_eq!(outcome.merged.get(10).unwrap().status, ItemStatus::SetByStrategy);
    }

    #[tokio::test]
    async fn single_round_is_idempotent() {
        let settings = CalibrationSettings {
            max_iterations: 1,
            ..CalibrationSettings::default()
        };
        let matrix = two_item_matrix();
        let strategy = CalibrationStrategy::new(rasch_only(), settings);

        let first = strategy
            .run_estimation(1, &matrix, PersonParamList::new(), None, None)
            .await
            .unwrap();
        let second = strategy
            .run_estimation(1, &matrix, PersonParamList::new(), None, None)
            .await
            .unwrap();

        for item in [10, 11] {
            let a = first.merged.get(item).unwrap().values.difficulty();
            let b = second.merged.get(item).unwrap().values.difficulty();
            assert!((a - b).abs() < 1e-12, "item {item}: {a} vs {b}");
        }
        assert_eq!(first.abilities, second.abilities);
    }

    #[tokio::test]
    async fn convergence_threshold_is_explicit_opt_in() {
        let matrix = two_item_matrix();

        // Default: no early stop, all rounds run.
        let fixed = CalibrationStrategy::new(rasch_only(), CalibrationSettings::default());
        let outcome = fixed
            .run_estimation(1, &matrix, PersonParamList::new(), None, None)
            .await
            .unwrap();
        assert_eq!(outcome.iterations_run, 5);

        // Opt-in with a generous threshold stops after the first round.
        let eager = CalibrationStrategy::new(
            rasch_only(),
            CalibrationSettings {
                convergence_threshold: Some(f64::MAX),
                ..CalibrationSettings::default()
            },
        );
        let outcome = eager
            .run_estimation(1, &matrix, PersonParamList::new(), None, None)
            .await
            .unwrap();
        assert_eq!(outcome.iterations_run, 1);
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_context_are_rejected() {
        let locks = CalibrationLocks::new();
        let _held = locks.acquire(5).unwrap();

        let strategy = CalibrationStrategy::new(rasch_only(), CalibrationSettings::default())
            .with_locks(Arc::clone(&locks));
        let matrix = two_item_matrix();

        let result = strategy
            .run_estimation(5, &matrix, PersonParamList::new(), None, None)
            .await;
        assert!(matches!(result, Err(CatError::CalibrationBusy(5))));

        // Other contexts stay unaffected.
        assert!(strategy
            .run_estimation(6, &matrix, PersonParamList::new(), None, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn dangling_override_raises_in_development() {
        let mut settings = CalibrationSettings {
            mode: EngineMode::Development,
            ..CalibrationSettings::default()
        };
        // 2pl cannot converge on three single-ability observations, so the
        // override points at a model with no data.
        settings.overrides.insert(10, "2pl".to_string());
        let registry = Arc::new(
            ModelRegistry::with_defaults()
                .restricted_to(&["1pl".to_string(), "2pl".to_string()])
                .unwrap(),
        );
        let strategy = CalibrationStrategy::new(registry, settings);

        let result = strategy
            .run_estimation(1, &two_item_matrix(), PersonParamList::new(), None, None)
            .await;
        assert!(matches!(result, Err(CatError::Configuration(_))));
    }

    #[tokio::test]
    async fn dangling_override_degrades_in_production() {
        let mut settings = CalibrationSettings {
            mode: EngineMode::Production,
            ..CalibrationSettings::default()
        };
        settings.overrides.insert(10, "2pl".to_string());
        let registry = Arc::new(
            ModelRegistry::with_defaults()
                .restricted_to(&["1pl".to_string(), "2pl".to_string()])
                .unwrap(),
        );
        let strategy = CalibrationStrategy::new(registry, settings);

        let outcome = strategy
            .run_estimation(1, &two_item_matrix(), PersonParamList::new(), None, None)
            .await
            .unwrap();
        // Fallback selected automatically; the item is still calibrated.
        assert_eq!(outcome.winners.get(&10).map(String::as_str), Some("1pl"));
    }

    #[tokio::test]
    async fn unknown_override_model_is_configuration_error() {
        let mut settings = CalibrationSettings::default();
        settings.overrides.insert(10, "5pl".to_string());
        let strategy = CalibrationStrategy::new(rasch_only(), settings);

        let result = strategy
            .run_estimation(1, &two_item_matrix(), PersonParamList::new(), None, None)
            .await;
        assert!(matches!(result, Err(CatError::Configuration(_))));
    }

    #[tokio::test]
    async fn persist_roundtrips_through_the_store() {
        use adaptest_store::MemoryParameterStore;

        let strategy = CalibrationStrategy::new(rasch_only(), CalibrationSettings::default());
        let outcome = strategy
            .run_estimation(1, &two_item_matrix(), PersonParamList::new(), None, None)
            .await
            .unwrap();

        let store = MemoryParameterStore::new();
        strategy.persist(&store, 1, &outcome).await.unwrap();

        // Winner rows come back under their model, tagged by the strategy.
        let loaded = store.load_item_params(1, "1pl").await.unwrap();
        assert_eq!(loaded.get(10).unwrap().status, ItemStatus::SetByStrategy);
        assert_eq!(
            loaded.get(11).unwrap().values,
            outcome.merged.get(11).unwrap().values
        );

        // Abilities round-trip exactly, sentinels included.
        let abilities = store.load_person_params(1, MERGED_MODEL).await.unwrap();
        assert_eq!(abilities, outcome.abilities);
    }

    #[test]
    fn strictly_smaller_criterion_always_wins() {
        let winner = best_by_criterion(vec![
            ("2pl".to_string(), 12.0),
            ("1pl".to_string(), 10.0),
        ]);
        assert_eq!(winner.as_deref(), Some("1pl"));
    }

    #[test]
    fn criterion_ties_keep_registration_order() {
        let winner = best_by_criterion(vec![
            ("1pl".to_string(), 10.0),
            ("2pl".to_string(), 10.0),
        ]);
        assert_eq!(winner.as_deref(), Some("1pl"));
    }

    #[test]
    fn non_finite_criterion_values_are_skipped() {
        let winner = best_by_criterion(vec![
            ("1pl".to_string(), f64::NAN),
            ("2pl".to_string(), 42.0),
        ]);
        assert_eq!(winner.as_deref(), Some("2pl"));
    }
}
