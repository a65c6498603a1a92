//! The preselect pipeline: ordered decision stages over one shared context.
//!
//! Each stage either mutates the context and passes control onward, or
//! returns a terminal outcome — a selected item or a stop-with-reason. The
//! first terminal outcome ends the chain; later stages never run.

use std::collections::BTreeMap;

use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use adaptest_core::config::QuizConfig;
use adaptest_core::error::{CatError, StopReason};
use adaptest_core::model::ParamVector;
use adaptest_core::scale::ScaleHierarchy;
use adaptest_core::{ItemId, ScaleId};
use adaptest_models::registry::ModelRegistry;

use crate::progress::AttemptProgress;

/// One selectable item with its calibrated parameters.
///
/// Pilot candidates carry placeholder parameters and are never scored by
/// information; they are served for data collection only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub item: ItemId,
    pub scale: ScaleId,
    /// Model name the parameters were calibrated under.
    pub model: String,
    pub values: ParamVector,
    #[serde(default)]
    pub pilot: bool,
}

/// A selected item, ready to serve.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSelection {
    pub item: ItemId,
    pub scale: ScaleId,
    /// Fisher information at the ability the item was selected at; 0.0 for
    /// pilot items.
    pub fisher_information: f64,
    pub pilot: bool,
}

/// Terminal result of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Item(ItemSelection),
    Stop(StopReason),
}

/// What one stage decided.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Pass control to the next stage.
    Continue,
    /// End the chain with this outcome.
    Terminal(SelectionOutcome),
}

/// Mutable state shared by all stages of one selection run.
pub struct SelectionContext<'a> {
    pub progress: &'a AttemptProgress,
    pub hierarchy: &'a ScaleHierarchy,
    pub registry: &'a ModelRegistry,
    pub config: &'a QuizConfig,
    /// Remaining candidate pool; stages narrow it down.
    pub candidates: Vec<CandidateItem>,
    /// Scale the stopping rules are evaluated against.
    pub primary_scale: ScaleId,
    /// Scales still eligible; starts from the progress state.
    pub active_scales: Vec<ScaleId>,
    /// Current per-scale abilities, copied from the progress.
    pub abilities: BTreeMap<ScaleId, f64>,
    /// Seeded generator for pilot sampling — the only intentional source
    /// of nondeterminism in the pipeline.
    pub rng: Pcg64,
}

impl<'a> SelectionContext<'a> {
    pub fn new(
        progress: &'a AttemptProgress,
        hierarchy: &'a ScaleHierarchy,
        registry: &'a ModelRegistry,
        config: &'a QuizConfig,
        candidates: Vec<CandidateItem>,
        primary_scale: ScaleId,
        rng: Pcg64,
    ) -> Self {
        let abilities = hierarchy
            .scale_ids()
            .map(|s| (s, progress.ability(s)))
            .collect();
        let active_scales = progress.active_scales().iter().copied().collect();
        Self {
            progress,
            hierarchy,
            registry,
            config,
            candidates,
            primary_scale,
            active_scales,
            abilities,
            rng,
        }
    }

    /// Ability for a scale, falling back to the nearest ancestor estimate.
    pub fn ability_for(&self, scale: ScaleId) -> f64 {
        if let Some(&theta) = self.abilities.get(&scale) {
            if theta != 0.0 {
                return theta;
            }
        }
        for ancestor in self.hierarchy.ancestors(scale).unwrap_or_default() {
            if let Some(&theta) = self.abilities.get(&ancestor) {
                if theta != 0.0 {
                    return theta;
                }
            }
        }
        self.abilities.get(&scale).copied().unwrap_or(0.0)
    }
}

/// One decision stage of the pipeline.
pub trait SelectionStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, ctx: &mut SelectionContext<'_>) -> Result<StageOutcome, CatError>;
}

/// The ordered stage chain.
pub struct PreselectPipeline {
    stages: Vec<Box<dyn SelectionStage>>,
}

impl PreselectPipeline {
    pub fn new(stages: Vec<Box<dyn SelectionStage>>) -> Self {
        Self { stages }
    }

    /// The canonical stage order: availability, subscale bounds, stopping
    /// rules, pilot sampling, maximum information.
    pub fn standard() -> Self {
        use crate::stages::{
            ExcludeUnavailable, MaxInformation, PilotSampling, StoppingRules, SubscaleBounds,
        };
        Self::new(vec![
            Box::new(ExcludeUnavailable),
            Box::new(SubscaleBounds),
            Box::new(StoppingRules),
            Box::new(PilotSampling),
            Box::new(MaxInformation),
        ])
    }

    /// Run the chain until the first terminal outcome.
    ///
    /// Falling off the end without a terminal outcome means no stage could
    /// select anything, which is an exhausted pool, never an error.
    pub fn run(&self, ctx: &mut SelectionContext<'_>) -> Result<SelectionOutcome, CatError> {
        for stage in &self.stages {
            match stage.apply(ctx)? {
                StageOutcome::Continue => {
                    tracing::trace!(
                        stage = stage.name(),
                        candidates = ctx.candidates.len(),
                        "stage passed"
                    );
                }
                StageOutcome::Terminal(outcome) => {
                    tracing::debug!(stage = stage.name(), ?outcome, "stage terminal");
                    return Ok(outcome);
                }
            }
        }
        Ok(SelectionOutcome::Stop(StopReason::ExhaustedCandidates))
    }
}
