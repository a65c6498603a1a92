//! Serve-next orchestration for one attempt.
//!
//! Each request loads the attempt progress (cache first, durable store
//! second, fresh otherwise), folds in the outcome of the previously served
//! item, re-estimates abilities when a new response arrived, runs the
//! preselect pipeline, and persists the updated snapshot. Requests are
//! strictly sequential per attempt, guarded by the session token.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use uuid::Uuid;

use adaptest_core::attempt::AttemptState;
use adaptest_core::config::QuizConfig;
use adaptest_core::error::{CatError, StopReason};
use adaptest_core::model::ParamVector;
use adaptest_core::scale::ScaleHierarchy;
use adaptest_core::traits::{ActivityLog, AttemptStore, ProgressCache};
use adaptest_core::{ContextId, ExamineeId, ItemId, ScaleId};
use adaptest_models::math::newton_1d;
use adaptest_models::registry::ModelRegistry;
use adaptest_models::traits::PsychometricModel as _;

use crate::pipeline::{
    CandidateItem, ItemSelection, PreselectPipeline, SelectionContext, SelectionOutcome,
};
use crate::progress::{AttemptProgress, ResponseOutcome};

/// One runtime request for an attempt.
#[derive(Debug, Clone)]
pub struct ServeRequest {
    pub attempt: Uuid,
    pub examinee: ExamineeId,
    pub context: ContextId,
    /// Required on every request after the first.
    pub session_token: Option<Uuid>,
}

/// What the runtime decided for this request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServeOutcome {
    /// Serve this item next.
    Item(ItemSelection),
    /// The attempt is over; the progress snapshot has been deleted.
    Stop(StopReason),
    /// A forced break is still active.
    OnBreak { until: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct ServeResult {
    pub outcome: ServeOutcome,
    /// Token the client must present on the next request.
    pub session_token: Uuid,
}

/// The adaptive runtime service for attempts.
pub struct AttemptService {
    attempts: Arc<dyn AttemptStore>,
    cache: Arc<dyn ProgressCache>,
    activity: Arc<dyn ActivityLog>,
    registry: Arc<ModelRegistry>,
    pipeline: PreselectPipeline,
}

impl AttemptService {
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        cache: Arc<dyn ProgressCache>,
        activity: Arc<dyn ActivityLog>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            attempts,
            cache,
            activity,
            registry,
            pipeline: PreselectPipeline::standard(),
        }
    }

    /// Replace the standard stage chain.
    pub fn with_pipeline(mut self, pipeline: PreselectPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Serve the next item for an attempt, or report why the attempt
    /// stopped.
    ///
    /// `candidates` is the full calibrated pool for the context; the
    /// pipeline filters out whatever this attempt has already consumed.
    pub async fn serve_next(
        &self,
        request: &ServeRequest,
        quiz_config: &QuizConfig,
        hierarchy: &ScaleHierarchy,
        candidates: Vec<CandidateItem>,
        primary_scale: ScaleId,
    ) -> Result<ServeResult> {
        let now = Utc::now();
        let mut progress = self.load_or_create(request, quiz_config, hierarchy, now).await?;
        let session_token = progress.session_token();

        // Breaks are detected lazily on read; no timer ever fires.
        if progress.clear_expired_break(now) {
            tracing::debug!(attempt = %request.attempt, "forced break expired, clearing");
            self.persist(&progress).await?;
        }
        if progress.on_break(now) {
            let until = progress.snapshot().break_until.expect("break is active");
            return Ok(ServeResult {
                outcome: ServeOutcome::OnBreak { until },
                session_token,
            });
        }

        // Fold in whatever happened to the previously served item.
        if progress.state() == AttemptState::AwaitingResponse {
            if let Some(last) = progress.last_played().cloned() {
                let outcome = self.previous_item_outcome(request.attempt, last.item).await?;
                progress.register_outcome(outcome, hierarchy, now);
            }
        }

        if progress.state() == AttemptState::HasNewResponse {
            self.update_abilities(&mut progress, hierarchy, &candidates);
        }

        // Deterministic per (attempt, step) seed; pilot sampling is the
        // only consumer of the randomness.
        let seed = (request.attempt.as_u128() as u64)
            ^ ((request.attempt.as_u128() >> 64) as u64)
            ^ progress.played_count() as u64;
        let mut ctx = SelectionContext::new(
            &progress,
            hierarchy,
            &self.registry,
            quiz_config,
            candidates,
            primary_scale,
            Pcg64::seed_from_u64(seed),
        );
        let outcome = self.pipeline.run(&mut ctx)?;

        match outcome {
            SelectionOutcome::Item(selection) => {
                progress.record_served(
                    selection.item,
                    selection.scale,
                    selection.fisher_information,
                    selection.pilot,
                    hierarchy,
                    now,
                );
                let session_token = progress.rotate_token();
                self.persist(&progress).await?;
                Ok(ServeResult {
                    outcome: ServeOutcome::Item(selection),
                    session_token,
                })
            }
            SelectionOutcome::Stop(reason) => {
                tracing::info!(attempt = %request.attempt, %reason, "attempt finished");
                progress.finish();
                self.attempts.delete(request.attempt).await?;
                self.cache
                    .invalidate(request.examinee, request.attempt)
                    .await;
                Ok(ServeResult {
                    outcome: ServeOutcome::Stop(reason),
                    session_token,
                })
            }
        }
    }

    /// Start a forced break for an attempt. Without an explicit duration
    /// the break length frozen into the attempt's quiz config applies.
    pub async fn force_break(
        &self,
        request: &ServeRequest,
        hierarchy: &ScaleHierarchy,
        duration: Option<Duration>,
    ) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let mut progress = self.load_existing(request, hierarchy).await?;
        let duration = duration.unwrap_or_else(|| {
            Duration::seconds(progress.snapshot().quiz_config.break_duration_secs as i64)
        });
        let until = progress.force_break(duration, now);
        self.persist(&progress).await?;
        Ok(until)
    }

    /// Mark an item as given up for this attempt.
    pub async fn give_up(
        &self,
        request: &ServeRequest,
        hierarchy: &ScaleHierarchy,
        item: ItemId,
    ) -> Result<()> {
        let mut progress = self.load_existing(request, hierarchy).await?;
        progress.give_up_item(item);
        self.persist(&progress).await?;
        Ok(())
    }

    async fn load_or_create(
        &self,
        request: &ServeRequest,
        quiz_config: &QuizConfig,
        hierarchy: &ScaleHierarchy,
        now: DateTime<Utc>,
    ) -> Result<AttemptProgress> {
        let snapshot = match self.cache.get(request.examinee, request.attempt).await {
            Some(snapshot) => Some(snapshot),
            None => self.attempts.load(request.attempt).await?,
        };

        match snapshot {
            Some(snapshot) => {
                let progress = AttemptProgress::from_snapshot(snapshot, hierarchy);
                let token = request
                    .session_token
                    .ok_or(CatError::SessionMismatch {
                        attempt: request.attempt,
                    })?;
                progress.validate_token(token)?;
                Ok(progress)
            }
            None => {
                tracing::debug!(attempt = %request.attempt, "creating attempt progress");
                let progress = AttemptProgress::new(
                    request.attempt,
                    request.examinee,
                    request.context,
                    quiz_config.clone(),
                    hierarchy,
                    now,
                );
                self.persist(&progress).await?;
                Ok(progress)
            }
        }
    }

    async fn load_existing(
        &self,
        request: &ServeRequest,
        hierarchy: &ScaleHierarchy,
    ) -> Result<AttemptProgress> {
        let snapshot = match self.cache.get(request.examinee, request.attempt).await {
            Some(snapshot) => Some(snapshot),
            None => self.attempts.load(request.attempt).await?,
        };
        let snapshot = snapshot.ok_or_else(|| {
            CatError::DataIntegrity(format!("no progress for attempt {}", request.attempt))
        })?;
        let progress = AttemptProgress::from_snapshot(snapshot, hierarchy);
        let token = request.session_token.ok_or(CatError::SessionMismatch {
            attempt: request.attempt,
        })?;
        progress.validate_token(token)?;
        Ok(progress)
    }

    async fn persist(&self, progress: &AttemptProgress) -> Result<()> {
        let snapshot = progress.snapshot();
        self.attempts.save(snapshot).await?;
        self.cache.put(snapshot.clone()).await;
        Ok(())
    }

    /// Classify what happened to the previously served item: answered,
    /// abandoned (seen but never answered), or no decision at all.
    async fn previous_item_outcome(
        &self,
        attempt: Uuid,
        item: ItemId,
    ) -> Result<ResponseOutcome> {
        if let Some(fraction) = self.activity.recorded_response(attempt, item).await? {
            return Ok(ResponseOutcome::Answered(fraction));
        }
        if self.activity.item_seen(attempt, item).await? {
            return Ok(ResponseOutcome::Abandoned);
        }
        Ok(ResponseOutcome::NoDecision)
    }

    /// Re-estimate abilities for every scale touched by the response
    /// history. Pilot items and items without calibrated parameters carry
    /// no information and are skipped.
    fn update_abilities(
        &self,
        progress: &mut AttemptProgress,
        hierarchy: &ScaleHierarchy,
        candidates: &[CandidateItem],
    ) {
        let pool: BTreeMap<ItemId, (&str, &ParamVector)> = candidates
            .iter()
            .filter(|c| !c.pilot)
            .map(|c| (c.item, (c.model.as_str(), &c.values)))
            .collect();

        let scales: Vec<ScaleId> = hierarchy.scale_ids().collect();
        for scale in scales {
            let pilot_items = progress.snapshot().pilot_items.clone();
            let observations: Vec<(&str, &ParamVector, f64)> = progress
                .responses_for_scale(scale)
                .into_iter()
                .filter(|r| !pilot_items.contains(&r.item))
                .filter_map(|r| pool.get(&r.item).map(|(m, v)| (*m, *v, r.fraction)))
                .collect();
            if observations.is_empty() {
                continue;
            }

            let mut resolved = Vec::with_capacity(observations.len());
            for (name, values, fraction) in &observations {
                match self.registry.get(name) {
                    Some(model) => resolved.push((model, *values, *fraction)),
                    None => {
                        tracing::warn!(model = name, "response references unknown model, skipping");
                    }
                }
            }
            if resolved.is_empty() {
                continue;
            }

            let seed = progress.ability(scale);
            let solved = newton_1d(seed, 50, 1e-6, |theta| {
                let mut g = 0.0;
                let mut h = 0.0;
                for (model, values, fraction) in &resolved {
                    g += model.d1_log_likelihood(theta, values, *fraction);
                    h += model.d2_log_likelihood(theta, values, *fraction);
                }
                (g, h)
            });

            let ability = match solved {
                Some(theta) => theta,
                None => {
                    // Divergent all-correct/all-wrong vectors clamp to the
                    // sentinel, matching calibration behavior.
                    let direction: f64 = resolved
                        .iter()
                        .map(|(model, values, fraction)| {
                            model.d1_log_likelihood(seed, values, *fraction)
                        })
                        .sum();
                    if direction >= 0.0 {
                        adaptest_core::model::SENTINEL
                    } else {
                        -adaptest_core::model::SENTINEL
                    }
                }
            };
            progress.set_ability(scale, ability);
        }
    }
}
