//! Flat attempt snapshot types.
//!
//! One attempt persists as a single serializable snapshot keyed by attempt
//! id. The runtime engine wraps this snapshot with behavior and a derived
//! per-scale index; only the flat data defined here ever hits a store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::{ContextId, ExamineeId, ItemId, ScaleId};

/// Lifecycle state of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// Created, no item served yet.
    New,
    /// An item is out with the examinee.
    AwaitingResponse,
    /// The last served item has a recorded response, not yet folded into
    /// the ability estimate.
    HasNewResponse,
    /// Completed; the snapshot is about to be deleted.
    Finished,
}

/// One served item with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayedItem {
    pub item: ItemId,
    /// Scale the item was served under.
    pub scale: ScaleId,
    /// Fisher information of the item at the ability it was selected at.
    pub fisher_information: f64,
    /// When the examinee last interacted with the item.
    pub last_attempt_at: DateTime<Utc>,
}

/// One recorded response in attempt order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub item: ItemId,
    pub scale: ScaleId,
    pub fraction: f64,
    pub answered_at: DateTime<Utc>,
}

/// The complete, flat persisted state of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub attempt: Uuid,
    pub examinee: ExamineeId,
    pub context: ContextId,
    pub state: AttemptState,
    /// Items in serve order.
    pub played: Vec<PlayedItem>,
    /// Current ability estimate per scale.
    pub abilities: BTreeMap<ScaleId, f64>,
    /// Scales still eligible for item selection.
    pub active_scales: BTreeSet<ScaleId>,
    /// Responses in answer order.
    pub responses: Vec<RecordedResponse>,
    /// Uncalibrated items served for data collection only.
    pub pilot_items: BTreeSet<ItemId>,
    /// Items excluded from selection for this attempt.
    pub excluded_items: BTreeSet<ItemId>,
    /// Items the examinee explicitly gave up on.
    pub given_up_items: BTreeSet<ItemId>,
    /// Absolute end of a forced break, when one is active.
    pub break_until: Option<DateTime<Utc>>,
    /// Token guarding against overlapping requests for this attempt.
    pub session_token: Uuid,
    pub started_at: DateTime<Utc>,
    /// Quiz configuration frozen at attempt start.
    pub quiz_config: QuizConfig,
}

impl ProgressSnapshot {
    /// Fresh snapshot for a new attempt.
    pub fn new(
        attempt: Uuid,
        examinee: ExamineeId,
        context: ContextId,
        quiz_config: QuizConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt,
            examinee,
            context,
            state: AttemptState::New,
            played: Vec::new(),
            abilities: BTreeMap::new(),
            active_scales: BTreeSet::new(),
            responses: Vec::new(),
            pilot_items: BTreeSet::new(),
            excluded_items: BTreeSet::new(),
            given_up_items: BTreeSet::new(),
            break_until: None,
            session_token: Uuid::new_v4(),
            started_at,
            quiz_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serde_roundtrip() {
        let mut snapshot = ProgressSnapshot::new(
            Uuid::new_v4(),
            42,
            7,
            QuizConfig::default(),
            Utc::now(),
        );
        snapshot.state = AttemptState::AwaitingResponse;
        snapshot.played.push(PlayedItem {
            item: 3,
            scale: 1,
            fisher_information: 0.42,
            last_attempt_at: Utc::now(),
        });
        snapshot.abilities.insert(1, -0.3);
        snapshot.active_scales.insert(1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ProgressSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn new_snapshot_starts_clean() {
        let s = ProgressSnapshot::new(Uuid::new_v4(), 1, 1, QuizConfig::default(), Utc::now());
        assert_eq!(s.state, AttemptState::New);
        assert!(s.played.is_empty());
        assert!(s.break_until.is_none());
    }
}
