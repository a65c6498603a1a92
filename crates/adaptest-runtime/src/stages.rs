//! Canonical selection stages.
//!
//! Composable building blocks of the preselect pipeline, in their standard
//! order: availability filtering, subscale floor/ceiling bounds, global
//! stopping rules, pilot sampling, and maximum-information selection.

use rand::Rng;

use adaptest_core::error::{CatError, StopReason};
use adaptest_core::ScaleId;
use adaptest_models::traits::PsychometricModel as _;

use crate::pipeline::{
    ItemSelection, SelectionContext, SelectionOutcome, SelectionStage, StageOutcome,
};

/// Drops candidates that were already played, excluded, or given up.
pub struct ExcludeUnavailable;

impl SelectionStage for ExcludeUnavailable {
    fn name(&self) -> &'static str {
        "exclude_unavailable"
    }

    fn apply(&self, ctx: &mut SelectionContext<'_>) -> Result<StageOutcome, CatError> {
        let progress = ctx.progress;
        ctx.candidates.retain(|c| !progress.is_unavailable(c.item));
        Ok(StageOutcome::Continue)
    }
}

/// Enforces per-subscale floor and ceiling item counts.
///
/// Scales at their ceiling are deactivated and their candidates dropped;
/// while any scale is under its floor, selection is restricted to
/// candidates that count toward an under-floor scale.
pub struct SubscaleBounds;

impl SubscaleBounds {
    /// Whether a candidate on `scale` counts toward `target` (its own
    /// scale or an ancestor).
    fn counts_toward(
        hierarchy: &adaptest_core::scale::ScaleHierarchy,
        scale: ScaleId,
        target: ScaleId,
    ) -> bool {
        scale == target || hierarchy.is_ancestor(target, scale)
    }
}

impl SelectionStage for SubscaleBounds {
    fn name(&self) -> &'static str {
        "subscale_bounds"
    }

    fn apply(&self, ctx: &mut SelectionContext<'_>) -> Result<StageOutcome, CatError> {
        let ceiling = ctx.config.max_items_per_subscale;
        if ceiling > 0 {
            // The ceiling binds proper subscales; a root scale indexes
            // every played item and is governed by max_items instead.
            let saturated: Vec<ScaleId> = ctx
                .active_scales
                .iter()
                .copied()
                .filter(|&s| {
                    !ctx.hierarchy.ancestors(s).unwrap_or_default().is_empty()
                        && ctx.progress.played_count_for_scale(s) >= ceiling as usize
                })
                .collect();
            let deactivated = !saturated.is_empty();
            let hierarchy = ctx.hierarchy;
            for scale in saturated {
                tracing::debug!(scale, "subscale ceiling reached, deactivating");
                ctx.active_scales.retain(|&s| s != scale);
                ctx.candidates
                    .retain(|c| !Self::counts_toward(hierarchy, c.scale, scale));
            }
            if deactivated && (ctx.active_scales.is_empty() || ctx.candidates.is_empty()) {
                return Ok(StageOutcome::Terminal(SelectionOutcome::Stop(
                    StopReason::NoActiveScales,
                )));
            }
        }

        let floor = ctx.config.min_items_per_subscale;
        if floor > 0 {
            let under_floor: Vec<ScaleId> = ctx
                .active_scales
                .iter()
                .copied()
                .filter(|&s| ctx.progress.played_count_for_scale(s) < floor as usize)
                .collect();
            if !under_floor.is_empty() {
                let hierarchy = ctx.hierarchy;
                let restricted: Vec<_> = ctx
                    .candidates
                    .iter()
                    .filter(|c| {
                        under_floor
                            .iter()
                            .any(|&s| Self::counts_toward(hierarchy, c.scale, s))
                    })
                    .cloned()
                    .collect();
                // Only restrict when something satisfies the floor;
                // otherwise the pool stays as-is and stopping rules decide.
                if !restricted.is_empty() {
                    ctx.candidates = restricted;
                }
            }
        }

        Ok(StageOutcome::Continue)
    }
}

/// Global stopping rules: precision target, item-count ceiling, empty pool.
pub struct StoppingRules;

impl SelectionStage for StoppingRules {
    fn name(&self) -> &'static str {
        "stopping_rules"
    }

    fn apply(&self, ctx: &mut SelectionContext<'_>) -> Result<StageOutcome, CatError> {
        let played = ctx.progress.played_count();
        if played >= ctx.config.max_items as usize {
            return Ok(StageOutcome::Terminal(SelectionOutcome::Stop(
                StopReason::MaxItemsReached,
            )));
        }

        if played >= ctx.config.min_items as usize {
            if let Some(se) = ctx.progress.standard_error(ctx.primary_scale) {
                if se <= ctx.config.target_standard_error {
                    return Ok(StageOutcome::Terminal(SelectionOutcome::Stop(
                        StopReason::TargetPrecisionReached,
                    )));
                }
            }
        }

        if ctx.candidates.is_empty() {
            return Ok(StageOutcome::Terminal(SelectionOutcome::Stop(
                StopReason::ExhaustedCandidates,
            )));
        }

        Ok(StageOutcome::Continue)
    }
}

/// Injects an uncalibrated pilot item at the configured ratio.
///
/// The only intentionally random stage: under the configured ratio a
/// random pilot candidate is served. Outside the sampled case, pilot
/// candidates are stripped so information selection never scores them.
pub struct PilotSampling;

impl SelectionStage for PilotSampling {
    fn name(&self) -> &'static str {
        "pilot_sampling"
    }

    fn apply(&self, ctx: &mut SelectionContext<'_>) -> Result<StageOutcome, CatError> {
        let ratio = ctx.config.pilot_ratio.clamp(0.0, 1.0);
        let pilots: Vec<usize> = ctx
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.pilot)
            .map(|(i, _)| i)
            .collect();

        if !pilots.is_empty() && ratio > 0.0 && ctx.rng.gen::<f64>() < ratio {
            let pick = pilots[ctx.rng.gen_range(0..pilots.len())];
            let candidate = ctx.candidates[pick].clone();
            tracing::debug!(item = candidate.item, "serving pilot item");
            return Ok(StageOutcome::Terminal(SelectionOutcome::Item(
                ItemSelection {
                    item: candidate.item,
                    scale: candidate.scale,
                    fisher_information: 0.0,
                    pilot: true,
                },
            )));
        }

        ctx.candidates.retain(|c| !c.pilot);
        Ok(StageOutcome::Continue)
    }
}

/// Selects the candidate with maximum Fisher information at the current
/// ability. Ties keep the lowest item id, so identical contexts yield
/// identical selections.
pub struct MaxInformation;

impl SelectionStage for MaxInformation {
    fn name(&self) -> &'static str {
        "max_information"
    }

    fn apply(&self, ctx: &mut SelectionContext<'_>) -> Result<StageOutcome, CatError> {
        let mut best: Option<(f64, &crate::pipeline::CandidateItem)> = None;
        for candidate in &ctx.candidates {
            let model = ctx.registry.require(&candidate.model)?;
            let theta = ctx.ability_for(candidate.scale);
            let info = model.fisher_information(theta, &candidate.values);
            let better = match best {
                None => true,
                Some((best_info, best_candidate)) => {
                    info > best_info || (info == best_info && candidate.item < best_candidate.item)
                }
            };
            if better {
                best = Some((info, candidate));
            }
        }

        match best {
            Some((info, candidate)) => Ok(StageOutcome::Terminal(SelectionOutcome::Item(
                ItemSelection {
                    item: candidate.item,
                    scale: candidate.scale,
                    fisher_information: info,
                    pilot: false,
                },
            ))),
            None => Ok(StageOutcome::Terminal(SelectionOutcome::Stop(
                StopReason::ExhaustedCandidates,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use uuid::Uuid;

    use adaptest_core::config::QuizConfig;
    use adaptest_core::model::ParamVector;
    use adaptest_core::scale::{ScaleEdge, ScaleHierarchy};
    use adaptest_models::registry::ModelRegistry;

    use crate::pipeline::{CandidateItem, PreselectPipeline, SelectionContext};
    use crate::progress::AttemptProgress;

    fn hierarchy() -> ScaleHierarchy {
        ScaleHierarchy::from_edges(&[
            ScaleEdge {
                scale: 1,
                parent: None,
            },
            ScaleEdge {
                scale: 2,
                parent: Some(1),
            },
            ScaleEdge {
                scale: 3,
                parent: Some(1),
            },
        ])
        .unwrap()
    }

    fn candidate(item: u64, scale: u64, difficulty: f64) -> CandidateItem {
        CandidateItem {
            item,
            scale,
            model: "2pl".into(),
            values: ParamVector::Dichotomous {
                difficulty,
                discrimination: 1.5,
                guessing: 0.0,
            },
            pilot: false,
        }
    }

    fn pilot(item: u64, scale: u64) -> CandidateItem {
        CandidateItem {
            item,
            scale,
            model: "2pl".into(),
            values: ParamVector::Dichotomous {
                difficulty: 0.0,
                discrimination: 1.0,
                guessing: 0.0,
            },
            pilot: true,
        }
    }

    struct Fixture {
        hierarchy: ScaleHierarchy,
        registry: ModelRegistry,
        config: QuizConfig,
        progress: AttemptProgress,
    }

    impl Fixture {
        fn new(config: QuizConfig) -> Self {
            let hierarchy = hierarchy();
            let progress = AttemptProgress::new(
                Uuid::new_v4(),
                1,
                1,
                config.clone(),
                &hierarchy,
                Utc::now(),
            );
            Self {
                hierarchy,
                registry: ModelRegistry::with_defaults(),
                config,
                progress,
            }
        }

        fn ctx(&self, candidates: Vec<CandidateItem>, seed: u64) -> SelectionContext<'_> {
            SelectionContext::new(
                &self.progress,
                &self.hierarchy,
                &self.registry,
                &self.config,
                candidates,
                1,
                Pcg64::seed_from_u64(seed),
            )
        }
    }

    #[test]
    fn exclude_drops_played_and_excluded_items() {
        let mut fixture = Fixture::new(QuizConfig::default());
        fixture
            .progress
            .record_served(10, 2, 0.5, false, &hierarchy(), Utc::now());
        fixture.progress.exclude_item(11);
        fixture.progress.give_up_item(12);

        let mut ctx = fixture.ctx(
            vec![
                candidate(10, 2, 0.0),
                candidate(11, 2, 0.0),
                candidate(12, 2, 0.0),
                candidate(13, 2, 0.0),
            ],
            0,
        );
        ExcludeUnavailable.apply(&mut ctx).unwrap();
        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].item, 13);
    }

    #[test]
    fn max_information_picks_item_nearest_current_ability() {
        let fixture = Fixture::new(QuizConfig::default());
        // Ability defaults to 0.0; difficulty 0.1 is the most informative.
        let mut ctx = fixture.ctx(
            vec![
                candidate(10, 2, -2.0),
                candidate(11, 2, 0.1),
                candidate(12, 2, 2.5),
            ],
            0,
        );
        let outcome = MaxInformation.apply(&mut ctx).unwrap();
        match outcome {
            StageOutcome::Terminal(SelectionOutcome::Item(selection)) => {
                assert_eq!(selection.item, 11);
                assert!(selection.fisher_information > 0.0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn max_information_ties_break_by_item_id() {
        let fixture = Fixture::new(QuizConfig::default());
        let mut ctx = fixture.ctx(vec![candidate(12, 2, 0.0), candidate(10, 2, 0.0)], 0);
        let outcome = MaxInformation.apply(&mut ctx).unwrap();
        match outcome {
            StageOutcome::Terminal(SelectionOutcome::Item(selection)) => {
                assert_eq!(selection.item, 10)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn empty_pool_stops_with_reason() {
        let fixture = Fixture::new(QuizConfig::default());
        let mut ctx = fixture.ctx(vec![], 0);
        let outcome = StoppingRules.apply(&mut ctx).unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Terminal(SelectionOutcome::Stop(StopReason::ExhaustedCandidates))
        );
    }

    #[test]
    fn max_items_stops_the_attempt() {
        let config = QuizConfig {
            max_items: 1,
            ..QuizConfig::default()
        };
        let mut fixture = Fixture::new(config);
        fixture
            .progress
            .record_served(10, 2, 0.5, false, &hierarchy(), Utc::now());

        let mut ctx = fixture.ctx(vec![candidate(11, 2, 0.0)], 0);
        let outcome = StoppingRules.apply(&mut ctx).unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Terminal(SelectionOutcome::Stop(StopReason::MaxItemsReached))
        );
    }

    #[test]
    fn precision_target_stops_after_min_items() {
        let config = QuizConfig {
            min_items: 1,
            target_standard_error: 0.5,
            ..QuizConfig::default()
        };
        let mut fixture = Fixture::new(config);
        // One item with information 9.0 gives SE = 1/3 <= 0.5.
        fixture
            .progress
            .record_served(10, 2, 9.0, false, &hierarchy(), Utc::now());

        let mut ctx = fixture.ctx(vec![candidate(11, 2, 0.0)], 0);
        let outcome = StoppingRules.apply(&mut ctx).unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Terminal(SelectionOutcome::Stop(StopReason::TargetPrecisionReached))
        );
    }

    #[test]
    fn precision_target_waits_for_min_items() {
        let config = QuizConfig {
            min_items: 3,
            target_standard_error: 0.5,
            ..QuizConfig::default()
        };
        let mut fixture = Fixture::new(config);
        fixture
            .progress
            .record_served(10, 2, 9.0, false, &hierarchy(), Utc::now());

        let mut ctx = fixture.ctx(vec![candidate(11, 2, 0.0)], 0);
        assert_eq!(StoppingRules.apply(&mut ctx).unwrap(), StageOutcome::Continue);
    }

    #[test]
    fn subscale_ceiling_drops_saturated_scale() {
        let config = QuizConfig {
            max_items_per_subscale: 1,
            ..QuizConfig::default()
        };
        let mut fixture = Fixture::new(config);
        let h = hierarchy();
        fixture.progress.record_served(10, 2, 0.5, false, &h, Utc::now());

        let mut ctx = fixture.ctx(vec![candidate(11, 2, 0.0), candidate(12, 3, 0.0)], 0);
        let outcome = SubscaleBounds.apply(&mut ctx).unwrap();
        assert_eq!(outcome, StageOutcome::Continue);
        // Scale 2 is saturated; only the scale-3 candidate survives.
        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].item, 12);
        assert!(!ctx.active_scales.contains(&2));
    }

    #[test]
    fn all_scales_saturated_stops_with_no_active_scales() {
        let config = QuizConfig {
            max_items_per_subscale: 1,
            ..QuizConfig::default()
        };
        let mut fixture = Fixture::new(config);
        let h = hierarchy();
        // The root indexes every played item, so two serves saturate all
        // three scales at ceiling 1.
        fixture.progress.record_served(10, 2, 0.5, false, &h, Utc::now());
        fixture.progress.record_served(11, 3, 0.5, false, &h, Utc::now());

        let mut ctx = fixture.ctx(vec![candidate(12, 2, 0.0)], 0);
        let outcome = SubscaleBounds.apply(&mut ctx).unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Terminal(SelectionOutcome::Stop(StopReason::NoActiveScales))
        );
    }

    #[test]
    fn subscale_floor_prioritizes_starved_scale() {
        let config = QuizConfig {
            min_items_per_subscale: 1,
            ..QuizConfig::default()
        };
        let mut fixture = Fixture::new(config);
        let h = hierarchy();
        fixture.progress.record_served(10, 2, 0.5, false, &h, Utc::now());

        // Scale 3 has no items yet; only its candidate survives.
        let mut ctx = fixture.ctx(vec![candidate(11, 2, 0.0), candidate(12, 3, 0.0)], 0);
        SubscaleBounds.apply(&mut ctx).unwrap();
        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].item, 12);
    }

    #[test]
    fn pilot_ratio_one_always_serves_a_pilot() {
        let config = QuizConfig {
            pilot_ratio: 1.0,
            ..QuizConfig::default()
        };
        let fixture = Fixture::new(config);
        let mut ctx = fixture.ctx(vec![candidate(10, 2, 0.0), pilot(99, 2)], 7);
        let outcome = PilotSampling.apply(&mut ctx).unwrap();
        match outcome {
            StageOutcome::Terminal(SelectionOutcome::Item(selection)) => {
                assert_eq!(selection.item, 99);
                assert!(selection.pilot);
                assert_eq!(selection.fisher_information, 0.0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn pilot_ratio_zero_strips_pilots() {
        let fixture = Fixture::new(QuizConfig::default());
        let mut ctx = fixture.ctx(vec![candidate(10, 2, 0.0), pilot(99, 2)], 7);
        let outcome = PilotSampling.apply(&mut ctx).unwrap();
        assert_eq!(outcome, StageOutcome::Continue);
        assert!(ctx.candidates.iter().all(|c| !c.pilot));
    }

    #[test]
    fn identical_contexts_yield_identical_selection() {
        let config = QuizConfig {
            pilot_ratio: 0.5,
            ..QuizConfig::default()
        };
        let fixture = Fixture::new(config);
        let pipeline = PreselectPipeline::standard();

        let candidates = vec![
            candidate(10, 2, -0.5),
            candidate(11, 2, 0.3),
            pilot(99, 3),
        ];
        let first = pipeline
            .run(&mut fixture.ctx(candidates.clone(), 42))
            .unwrap();
        let second = pipeline
            .run(&mut fixture.ctx(candidates, 42))
            .unwrap();
        assert_eq!(first, second);
    }
}
