//! Attempt progress: the per-attempt state machine.
//!
//! Wraps the flat [`ProgressSnapshot`] with behavior and a derived
//! per-scale index of played items. The index is never persisted; it is
//! rebuilt from the flat list on load, and the invariant
//! `played_by_scale[s] == { q in played : scale(q) == s or s is an
//! ancestor of scale(q) }` holds after every mutation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use adaptest_core::attempt::{AttemptState, PlayedItem, ProgressSnapshot, RecordedResponse};
use adaptest_core::config::QuizConfig;
use adaptest_core::error::CatError;
use adaptest_core::model::clamp_to_sentinel;
use adaptest_core::scale::ScaleHierarchy;
use adaptest_core::{ContextId, ExamineeId, ItemId, ScaleId};

/// What happened to the previously served item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseOutcome {
    /// A response was recorded with this fraction.
    Answered(f64),
    /// The examinee saw the item but walked away; counts as failed.
    Abandoned,
    /// No response and no activity (a page reload); the serve is rolled
    /// back as if the item had never been chosen.
    NoDecision,
}

/// In-memory attempt state with the derived per-scale index.
#[derive(Debug, Clone)]
pub struct AttemptProgress {
    snapshot: ProgressSnapshot,
    by_scale: BTreeMap<ScaleId, BTreeSet<ItemId>>,
}

impl AttemptProgress {
    /// Create progress for a brand-new attempt. All hierarchy scales start
    /// active.
    pub fn new(
        attempt: Uuid,
        examinee: ExamineeId,
        context: ContextId,
        quiz_config: QuizConfig,
        hierarchy: &ScaleHierarchy,
        now: DateTime<Utc>,
    ) -> Self {
        let mut snapshot = ProgressSnapshot::new(attempt, examinee, context, quiz_config, now);
        snapshot.active_scales = hierarchy.scale_ids().collect();
        Self {
            snapshot,
            by_scale: BTreeMap::new(),
        }
    }

    /// Rehydrate progress from a stored snapshot, rebuilding the index.
    pub fn from_snapshot(snapshot: ProgressSnapshot, hierarchy: &ScaleHierarchy) -> Self {
        let mut progress = Self {
            snapshot,
            by_scale: BTreeMap::new(),
        };
        progress.rebuild_index(hierarchy);
        progress
    }

    fn rebuild_index(&mut self, hierarchy: &ScaleHierarchy) {
        self.by_scale.clear();
        let played: Vec<(ItemId, ScaleId)> = self
            .snapshot
            .played
            .iter()
            .map(|p| (p.item, p.scale))
            .collect();
        for (item, scale) in played {
            self.index_item(item, scale, hierarchy);
        }
    }

    fn index_item(&mut self, item: ItemId, scale: ScaleId, hierarchy: &ScaleHierarchy) {
        let scales = hierarchy
            .self_and_ancestors(scale)
            .unwrap_or_else(|_| vec![scale]);
        for s in scales {
            self.by_scale.entry(s).or_default().insert(item);
        }
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> ProgressSnapshot {
        self.snapshot
    }

    pub fn state(&self) -> AttemptState {
        self.snapshot.state
    }

    pub fn session_token(&self) -> Uuid {
        self.snapshot.session_token
    }

    /// Reject a request carrying a stale or foreign session token.
    pub fn validate_token(&self, token: Uuid) -> Result<(), CatError> {
        if token != self.snapshot.session_token {
            return Err(CatError::SessionMismatch {
                attempt: self.snapshot.attempt,
            });
        }
        Ok(())
    }

    /// Issue a fresh session token, invalidating the previous one. Called
    /// once per successful serve so overlapping requests for the same
    /// attempt present a stale token and are rejected.
    pub fn rotate_token(&mut self) -> Uuid {
        self.snapshot.session_token = Uuid::new_v4();
        self.snapshot.session_token
    }

    /// The most recently served item, if any.
    pub fn last_played(&self) -> Option<&PlayedItem> {
        self.snapshot.played.last()
    }

    /// Record a newly served item and index it under its scale and every
    /// ancestor.
    pub fn record_served(
        &mut self,
        item: ItemId,
        scale: ScaleId,
        fisher_information: f64,
        pilot: bool,
        hierarchy: &ScaleHierarchy,
        now: DateTime<Utc>,
    ) {
        self.snapshot.played.push(PlayedItem {
            item,
            scale,
            fisher_information,
            last_attempt_at: now,
        });
        if pilot {
            self.snapshot.pilot_items.insert(item);
        }
        self.index_item(item, scale, hierarchy);
        self.snapshot.state = AttemptState::AwaitingResponse;
    }

    /// Fold the outcome of the previously served item into the history.
    pub fn register_outcome(
        &mut self,
        outcome: ResponseOutcome,
        hierarchy: &ScaleHierarchy,
        now: DateTime<Utc>,
    ) {
        let Some(last) = self.snapshot.played.last().cloned() else {
            return;
        };
        match outcome {
            ResponseOutcome::Answered(fraction) => {
                self.push_response(last.item, last.scale, fraction, now);
            }
            ResponseOutcome::Abandoned => {
                tracing::debug!(item = last.item, "item abandoned, recording failed response");
                self.push_response(last.item, last.scale, 0.0, now);
            }
            ResponseOutcome::NoDecision => {
                tracing::debug!(item = last.item, "no decision for served item, rolling back");
                self.rollback_last(hierarchy);
            }
        }
    }

    fn push_response(&mut self, item: ItemId, scale: ScaleId, fraction: f64, now: DateTime<Utc>) {
        self.snapshot.responses.push(RecordedResponse {
            item,
            scale,
            fraction,
            answered_at: now,
        });
        if let Some(last) = self.snapshot.played.last_mut() {
            if last.item == item {
                last.last_attempt_at = now;
            }
        }
        self.snapshot.state = AttemptState::HasNewResponse;
    }

    /// Remove the most recently served item from the flat list and from
    /// every per-scale index, so a reload does not double-count it.
    pub fn rollback_last(&mut self, hierarchy: &ScaleHierarchy) {
        let Some(last) = self.snapshot.played.pop() else {
            return;
        };
        self.snapshot.pilot_items.remove(&last.item);
        self.rebuild_index(hierarchy);
        self.snapshot.state = if self.snapshot.played.is_empty() {
            AttemptState::New
        } else {
            AttemptState::AwaitingResponse
        };
    }

    /// Played items indexed under `scale` (its own items plus all
    /// descendants' items).
    pub fn played_by_scale(&self, scale: ScaleId) -> BTreeSet<ItemId> {
        self.by_scale.get(&scale).cloned().unwrap_or_default()
    }

    pub fn played_count(&self) -> usize {
        self.snapshot.played.len()
    }

    pub fn played_count_for_scale(&self, scale: ScaleId) -> usize {
        self.by_scale.get(&scale).map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the item was already served, excluded, or given up.
    pub fn is_unavailable(&self, item: ItemId) -> bool {
        self.snapshot.played.iter().any(|p| p.item == item)
            || self.snapshot.excluded_items.contains(&item)
            || self.snapshot.given_up_items.contains(&item)
    }

    /// Accumulated Fisher information of non-pilot items under `scale`.
    pub fn accumulated_information(&self, scale: ScaleId) -> f64 {
        let Some(indexed) = self.by_scale.get(&scale) else {
            return 0.0;
        };
        self.snapshot
            .played
            .iter()
            .filter(|p| indexed.contains(&p.item) && !self.snapshot.pilot_items.contains(&p.item))
            .map(|p| p.fisher_information)
            .sum()
    }

    /// Current standard error on `scale`, `None` while no information has
    /// accumulated.
    pub fn standard_error(&self, scale: ScaleId) -> Option<f64> {
        let info = self.accumulated_information(scale);
        (info > 0.0).then(|| 1.0 / info.sqrt())
    }

    pub fn ability(&self, scale: ScaleId) -> f64 {
        self.snapshot.abilities.get(&scale).copied().unwrap_or(0.0)
    }

    pub fn set_ability(&mut self, scale: ScaleId, ability: f64) {
        self.snapshot
            .abilities
            .insert(scale, clamp_to_sentinel(ability));
    }

    pub fn active_scales(&self) -> &BTreeSet<ScaleId> {
        &self.snapshot.active_scales
    }

    pub fn deactivate_scale(&mut self, scale: ScaleId) {
        self.snapshot.active_scales.remove(&scale);
    }

    pub fn exclude_item(&mut self, item: ItemId) {
        self.snapshot.excluded_items.insert(item);
    }

    pub fn give_up_item(&mut self, item: ItemId) {
        self.snapshot.given_up_items.insert(item);
    }

    /// Start a forced break ending at `now + duration`.
    pub fn force_break(&mut self, duration: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = now + duration;
        self.snapshot.break_until = Some(until);
        until
    }

    /// Whether a break is active at `now`. Expired breaks are reported as
    /// inactive even before they are cleared.
    pub fn on_break(&self, now: DateTime<Utc>) -> bool {
        matches!(self.snapshot.break_until, Some(until) if now < until)
    }

    /// Lazily clear an expired break. Returns true when one was cleared.
    pub fn clear_expired_break(&mut self, now: DateTime<Utc>) -> bool {
        match self.snapshot.break_until {
            Some(until) if now >= until => {
                self.snapshot.break_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) {
        self.snapshot.state = AttemptState::Finished;
    }

    /// Response history of items indexed under `scale`.
    pub fn responses_for_scale(&self, scale: ScaleId) -> Vec<&RecordedResponse> {
        let indexed = self.by_scale.get(&scale);
        self.snapshot
            .responses
            .iter()
            .filter(|r| indexed.is_some_and(|set| set.contains(&r.item)))
            .collect()
    }
}
