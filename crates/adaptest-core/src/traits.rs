//! Boundary contracts to the excluded collaborators.
//!
//! The core never talks to a database, webservice, or activity log directly;
//! it consumes these narrow async traits. The `adaptest-store` crate ships
//! in-memory implementations; hosting platforms bring their own.

use async_trait::async_trait;
use uuid::Uuid;

use crate::attempt::ProgressSnapshot;
use crate::model::{ItemParamList, ItemParameters, ItemStatus, PersonParamList, Response};
use crate::{ContextId, ExamineeId, ItemId, ScaleId};

/// Source of observed responses for calibration.
#[async_trait]
pub trait ResponseSource: Send + Sync {
    /// All responses recorded for `scale` (including its descendants) in
    /// `context`.
    async fn responses(&self, context: ContextId, scale: ScaleId) -> anyhow::Result<Vec<Response>>;
}

/// Row-level access to calibrated parameters.
///
/// Rows are keyed by (item or examinee, model, context) and carry
/// created/modified timestamps maintained by the store. Uniqueness of
/// `SetManually` per (item, context) is enforced transactionally by the
/// implementation.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn load_item_params(
        &self,
        context: ContextId,
        model: &str,
    ) -> anyhow::Result<ItemParamList>;

    /// Insert or update every row in `list` for (model, context).
    async fn upsert_item_params(
        &self,
        context: ContextId,
        list: &ItemParamList,
    ) -> anyhow::Result<()>;

    /// Pin one item's parameters manually, demoting any sibling row that
    /// currently holds `SetManually` for the same item to `NotCalculated`.
    async fn set_manually(
        &self,
        context: ContextId,
        params: ItemParameters,
    ) -> anyhow::Result<()>;

    /// Update the status of an existing row. Fails with a data integrity
    /// error when the row does not exist.
    async fn update_item_status(
        &self,
        context: ContextId,
        model: &str,
        item: ItemId,
        status: ItemStatus,
    ) -> anyhow::Result<()>;

    async fn load_person_params(
        &self,
        context: ContextId,
        model: &str,
    ) -> anyhow::Result<PersonParamList>;

    async fn upsert_person_params(
        &self,
        context: ContextId,
        model: &str,
        list: &PersonParamList,
    ) -> anyhow::Result<()>;
}

/// Durable storage of attempt snapshots, one row per attempt id.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn load(&self, attempt: Uuid) -> anyhow::Result<Option<ProgressSnapshot>>;
    async fn save(&self, snapshot: &ProgressSnapshot) -> anyhow::Result<()>;
    async fn delete(&self, attempt: Uuid) -> anyhow::Result<()>;
}

/// Volatile mirror of attempt snapshots keyed by (examinee, attempt).
#[async_trait]
pub trait ProgressCache: Send + Sync {
    async fn get(&self, examinee: ExamineeId, attempt: Uuid) -> Option<ProgressSnapshot>;
    async fn put(&self, snapshot: ProgressSnapshot);
    async fn invalidate(&self, examinee: ExamineeId, attempt: Uuid);
}

/// Activity information for the previously served item of an attempt.
///
/// Used to distinguish an abandoned item (seen, never answered) from a page
/// reload where no decision was made.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Whether the examinee viewed the item at all.
    async fn item_seen(&self, attempt: Uuid, item: ItemId) -> anyhow::Result<bool>;

    /// The recorded response fraction for the item, if one exists.
    async fn recorded_response(
        &self,
        attempt: Uuid,
        item: ItemId,
    ) -> anyhow::Result<Option<f64>>;
}
