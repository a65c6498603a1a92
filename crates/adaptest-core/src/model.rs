//! Core data model types for adaptest.
//!
//! Responses, item parameters, person parameters, and the typed containers
//! the calibration and runtime engines exchange.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ExamineeId, ItemId, ScaleId};

/// Sentinel magnitude standing in for a mathematically infinite estimate.
///
/// Stores cannot hold true infinities, so estimates that diverge (an examinee
/// who answered everything correctly, an item nobody got wrong) are encoded
/// as ±1000. Domain logic treats loaded values as plain finite floats and
/// never compares against infinity directly.
pub const SENTINEL: f64 = 1000.0;

/// Clamp an estimate to the storable range, mapping non-finite values to the
/// sentinel.
pub fn clamp_to_sentinel(value: f64) -> f64 {
    if value.is_nan() {
        SENTINEL
    } else {
        value.clamp(-SENTINEL, SENTINEL)
    }
}

/// A single observed response: one examinee on one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Examinee who answered.
    pub examinee: ExamineeId,
    /// Item that was answered.
    pub item: ItemId,
    /// Scale the item belongs to.
    pub scale: ScaleId,
    /// Fraction correct in `[0, 1]`. Dichotomous items use 0.0 / 1.0.
    pub fraction: f64,
}

/// One (ability, fraction) observation used for per-item estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Current ability estimate of the examinee who answered.
    pub ability: f64,
    /// Fraction correct of the response.
    pub fraction: f64,
}

/// Examinee × item response data, filtered to scorable items.
///
/// Items with zero observed correct answers across the calibration sample
/// carry no information for estimation and are dropped at construction.
#[derive(Debug, Clone, Default)]
pub struct ResponseMatrix {
    by_examinee: BTreeMap<ExamineeId, BTreeMap<ItemId, Response>>,
    by_item: BTreeMap<ItemId, Vec<Response>>,
    dropped: BTreeSet<ItemId>,
}

impl ResponseMatrix {
    /// Build a matrix from raw responses, dropping unscorable items.
    pub fn from_responses(responses: Vec<Response>) -> Self {
        let mut by_item: BTreeMap<ItemId, Vec<Response>> = BTreeMap::new();
        for r in responses {
            by_item.entry(r.item).or_default().push(r);
        }

        let dropped: BTreeSet<ItemId> = by_item
            .iter()
            .filter(|(_, rs)| rs.iter().all(|r| r.fraction <= 0.0))
            .map(|(&item, _)| item)
            .collect();
        for item in &dropped {
            tracing::debug!(item, "dropping item with no correct responses");
            by_item.remove(item);
        }

        let mut by_examinee: BTreeMap<ExamineeId, BTreeMap<ItemId, Response>> = BTreeMap::new();
        for rs in by_item.values() {
            for r in rs {
                by_examinee
                    .entry(r.examinee)
                    .or_default()
                    .insert(r.item, r.clone());
            }
        }

        Self {
            by_examinee,
            by_item,
            dropped,
        }
    }

    /// Items that were dropped as unscorable.
    pub fn dropped_items(&self) -> &BTreeSet<ItemId> {
        &self.dropped
    }

    /// Ids of all scorable items, in ascending order.
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.by_item.keys().copied()
    }

    /// Ids of all examinees with at least one scorable response.
    pub fn examinee_ids(&self) -> impl Iterator<Item = ExamineeId> + '_ {
        self.by_examinee.keys().copied()
    }

    /// All scorable responses of one examinee, keyed by item.
    pub fn examinee_responses(&self, examinee: ExamineeId) -> Option<&BTreeMap<ItemId, Response>> {
        self.by_examinee.get(&examinee)
    }

    /// All (ability, fraction) observations for one item, with each
    /// examinee's current ability attached from `abilities`.
    pub fn item_observations(
        &self,
        item: ItemId,
        abilities: &PersonParamList,
    ) -> Vec<Observation> {
        self.by_item
            .get(&item)
            .map(|rs| {
                rs.iter()
                    .map(|r| Observation {
                        ability: abilities.ability(r.examinee, r.scale),
                        fraction: r.fraction,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of scorable items.
    pub fn item_count(&self) -> usize {
        self.by_item.len()
    }

    /// Number of examinees with scorable responses.
    pub fn examinee_count(&self) -> usize {
        self.by_examinee.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }
}

/// Calibration status of an item parameter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// No estimate has ever been produced.
    NotSet,
    /// Estimation ran but did not converge for this item.
    NotCalculated,
    /// Winning estimate chosen by the calibration strategy.
    SetByStrategy,
    /// Pinned by an administrator; calibration must not overwrite it.
    SetManually,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::NotSet => write!(f, "not_set"),
            ItemStatus::NotCalculated => write!(f, "not_calculated"),
            ItemStatus::SetByStrategy => write!(f, "set_by_strategy"),
            ItemStatus::SetManually => write!(f, "set_manually"),
        }
    }
}

/// One step of a multi-category item: the category fraction and the
/// difficulty of reaching it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryStep {
    /// Fraction awarded for this category, ascending across steps.
    pub fraction: f64,
    /// Step difficulty on the ability scale.
    pub difficulty: f64,
}

/// Model-shaped parameter vector for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamVector {
    /// Single-difficulty logistic item (1PL, 2PL, 3PL).
    Dichotomous {
        difficulty: f64,
        discrimination: f64,
        /// Guessing floor; 0.0 for 1PL/2PL.
        guessing: f64,
    },
    /// Shared discrimination plus ordered category steps.
    PartialCredit {
        discrimination: f64,
        steps: Vec<CategoryStep>,
    },
}

impl ParamVector {
    /// Representative difficulty, used for summaries and ordering. For
    /// partial-credit items this is the mean step difficulty.
    pub fn difficulty(&self) -> f64 {
        match self {
            ParamVector::Dichotomous { difficulty, .. } => *difficulty,
            ParamVector::PartialCredit { steps, .. } => {
                if steps.is_empty() {
                    0.0
                } else {
                    steps.iter().map(|s| s.difficulty).sum::<f64>() / steps.len() as f64
                }
            }
        }
    }

    pub fn discrimination(&self) -> f64 {
        match self {
            ParamVector::Dichotomous { discrimination, .. } => *discrimination,
            ParamVector::PartialCredit { discrimination, .. } => *discrimination,
        }
    }

    /// Clamp every component to the storable sentinel range.
    pub fn clamped(self) -> Self {
        match self {
            ParamVector::Dichotomous {
                difficulty,
                discrimination,
                guessing,
            } => ParamVector::Dichotomous {
                difficulty: clamp_to_sentinel(difficulty),
                discrimination: clamp_to_sentinel(discrimination),
                guessing: clamp_to_sentinel(guessing),
            },
            ParamVector::PartialCredit {
                discrimination,
                steps,
            } => ParamVector::PartialCredit {
                discrimination: clamp_to_sentinel(discrimination),
                steps: steps
                    .into_iter()
                    .map(|s| CategoryStep {
                        fraction: s.fraction,
                        difficulty: clamp_to_sentinel(s.difficulty),
                    })
                    .collect(),
            },
        }
    }
}

/// Calibrated parameters of one item under one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemParameters {
    pub item: ItemId,
    /// Model name as registered in the model registry.
    pub model: String,
    pub values: ParamVector,
    pub status: ItemStatus,
    /// Free-form metadata carried alongside the row.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Typed container of item parameters for one model, keyed by item id.
///
/// Iteration order is ascending by item id, which keeps downstream selection
/// deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemParamList {
    /// Model these parameters belong to.
    pub model: String,
    items: BTreeMap<ItemId, ItemParameters>,
}

impl ItemParamList {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            items: BTreeMap::new(),
        }
    }

    /// Insert parameters, clamping every component to the sentinel range.
    pub fn insert(&mut self, mut params: ItemParameters) {
        params.values = params.values.clamped();
        self.items.insert(params.item, params);
    }

    pub fn get(&self, item: ItemId) -> Option<&ItemParameters> {
        self.items.get(&item)
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.items.contains_key(&item)
    }

    pub fn remove(&mut self, item: ItemId) -> Option<ItemParameters> {
        self.items.remove(&item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemParameters> {
        self.items.values()
    }

    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Overwrite the status of every contained row.
    pub fn set_status(&mut self, status: ItemStatus) {
        for p in self.items.values_mut() {
            p.status = status;
        }
    }
}

/// Ability of one examinee on one scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonParameters {
    pub examinee: ExamineeId,
    pub scale: ScaleId,
    pub ability: f64,
}

/// Typed container of abilities keyed by (examinee, scale).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonParamList {
    entries: BTreeMap<(ExamineeId, ScaleId), f64>,
}

impl PersonParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an ability, clamping non-finite values to the sentinel.
    pub fn insert(&mut self, examinee: ExamineeId, scale: ScaleId, ability: f64) {
        self.entries
            .insert((examinee, scale), clamp_to_sentinel(ability));
    }

    /// Ability for (examinee, scale), defaulting to 0.0 when unseen.
    pub fn ability(&self, examinee: ExamineeId, scale: ScaleId) -> f64 {
        self.entries.get(&(examinee, scale)).copied().unwrap_or(0.0)
    }

    pub fn get(&self, examinee: ExamineeId, scale: ScaleId) -> Option<f64> {
        self.entries.get(&(examinee, scale)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = PersonParameters> + '_ {
        self.entries
            .iter()
            .map(|(&(examinee, scale), &ability)| PersonParameters {
                examinee,
                scale,
                ability,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
