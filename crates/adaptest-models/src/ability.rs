//! Maximum-likelihood ability estimation.
//!
//! Per examinee (and per scale), the joint log-likelihood of the observed
//! response vector is maximized by Newton-Raphson against the supplied item
//! parameters. Estimation is independent per examinee, so examinees are
//! fanned out concurrently under a semaphore.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use adaptest_core::error::CatError;
use adaptest_core::model::{
    ItemParamList, ParamVector, PersonParamList, ResponseMatrix, SENTINEL,
};
use adaptest_core::scale::ScaleHierarchy;
use adaptest_core::{ItemId, ScaleId};

use crate::math::{newton_1d, NEWTON_MAX_ITER, NEWTON_TOL};
use crate::registry::ModelRegistry;
use crate::traits::PsychometricModel;

/// Newton-Raphson ability solver.
#[derive(Debug, Clone)]
pub struct AbilityEstimator {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Maximum concurrent per-examinee solves.
    pub concurrency: usize,
}

impl Default for AbilityEstimator {
    fn default() -> Self {
        Self {
            max_iterations: NEWTON_MAX_ITER,
            tolerance: NEWTON_TOL,
            concurrency: 4,
        }
    }
}

type ResolvedPool = BTreeMap<ItemId, (Arc<dyn PsychometricModel>, ParamVector)>;

impl AbilityEstimator {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Estimate abilities for every examinee in `matrix` against `items`.
    ///
    /// Each response contributes to the ability on its own scale; when a
    /// `hierarchy` is supplied it also contributes to every ancestor scale,
    /// so parent scales pool the evidence of their subscales. Examinees
    /// without scorable responses produce no entry. Non-convergent solves
    /// clamp to the ±1000 sentinel.
    pub async fn estimate(
        &self,
        matrix: &ResponseMatrix,
        items: &ItemParamList,
        registry: &ModelRegistry,
        seeds: &PersonParamList,
        hierarchy: Option<&ScaleHierarchy>,
    ) -> Result<PersonParamList, CatError> {
        let mut pool: ResolvedPool = BTreeMap::new();
        for row in items.iter() {
            pool.insert(row.item, (registry.require(&row.model)?, row.values.clone()));
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut futures = FuturesUnordered::new();

        for examinee in matrix.examinee_ids() {
            let semaphore = Arc::clone(&semaphore);
            let pool = &pool;
            futures.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let solved = self.solve_examinee(examinee, matrix, pool, seeds, hierarchy);
                (examinee, solved)
            });
        }

        let mut out = PersonParamList::new();
        while let Some((examinee, abilities)) = futures.next().await {
            for (scale, ability) in abilities {
                out.insert(examinee, scale, ability);
            }
        }
        Ok(out)
    }

    fn solve_examinee(
        &self,
        examinee: u64,
        matrix: &ResponseMatrix,
        pool: &ResolvedPool,
        seeds: &PersonParamList,
        hierarchy: Option<&ScaleHierarchy>,
    ) -> Vec<(ScaleId, f64)> {
        let Some(responses) = matrix.examinee_responses(examinee) else {
            return Vec::new();
        };

        // Group the scorable responses by target scale.
        let mut by_scale: BTreeMap<ScaleId, Vec<(&Arc<dyn PsychometricModel>, &ParamVector, f64)>> =
            BTreeMap::new();
        for response in responses.values() {
            let Some((model, params)) = pool.get(&response.item) else {
                continue;
            };
            let scales: Vec<ScaleId> = match hierarchy {
                Some(h) => h
                    .self_and_ancestors(response.scale)
                    .unwrap_or_else(|_| vec![response.scale]),
                None => vec![response.scale],
            };
            for scale in scales {
                by_scale
                    .entry(scale)
                    .or_default()
                    .push((model, params, response.fraction));
            }
        }

        let mut out = Vec::with_capacity(by_scale.len());
        for (scale, observations) in by_scale {
            let seed = seeds.get(examinee, scale).unwrap_or(0.0);
            let ability = self.solve_theta(seed, &observations);
            out.push((scale, ability));
        }
        out
    }

    fn solve_theta(
        &self,
        seed: f64,
        observations: &[(&Arc<dyn PsychometricModel>, &ParamVector, f64)],
    ) -> f64 {
        let grad = |theta: f64| -> (f64, f64) {
            let mut g = 0.0;
            let mut h = 0.0;
            for (model, params, fraction) in observations {
                g += model.d1_log_likelihood(theta, params, *fraction);
                h += model.d2_log_likelihood(theta, params, *fraction);
            }
            (g, h)
        };

        match newton_1d(seed, self.max_iterations, self.tolerance, grad) {
            Some(theta) => theta,
            None => {
                // Divergent (all-correct / all-wrong) vectors run off to
                // infinity; the gradient direction at the seed picks the
                // sentinel sign.
                let (g, _) = grad(seed);
                if g >= 0.0 {
                    SENTINEL
                } else {
                    -SENTINEL
                }
            }
        }
    }
}
