//! In-memory store implementations.
//!
//! Rows are keyed the way the boundary contracts require — item parameters
//! by (context, model, item), person parameters by (context, model,
//! examinee, scale) — and carry created/modified timestamps. The
//! single-`SetManually`-per-(item, context) invariant is enforced inside
//! one write lock, which is the in-memory equivalent of a transaction.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use adaptest_core::attempt::ProgressSnapshot;
use adaptest_core::error::CatError;
use adaptest_core::model::{
    ItemParamList, ItemParameters, ItemStatus, PersonParamList, Response,
};
use adaptest_core::scale::ScaleHierarchy;
use adaptest_core::traits::{
    ActivityLog, AttemptStore, ParameterStore, ResponseSource,
};
use adaptest_core::{ContextId, ExamineeId, ItemId, ScaleId};

/// One stored item-parameter row.
#[derive(Debug, Clone)]
pub struct ItemParamRow {
    pub params: ItemParameters,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// One stored person-parameter row.
#[derive(Debug, Clone)]
pub struct PersonParamRow {
    pub ability: f64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

type ItemKey = (ContextId, String, ItemId);
type PersonKey = (ContextId, String, ExamineeId, ScaleId);

/// In-memory [`ParameterStore`].
#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    items: RwLock<BTreeMap<ItemKey, ItemParamRow>>,
    persons: RwLock<BTreeMap<PersonKey, PersonParamRow>>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct row access, for inspection in tests and tooling.
    pub async fn item_row(
        &self,
        context: ContextId,
        model: &str,
        item: ItemId,
    ) -> Option<ItemParamRow> {
        self.items
            .read()
            .await
            .get(&(context, model.to_string(), item))
            .cloned()
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn load_item_params(
        &self,
        context: ContextId,
        model: &str,
    ) -> anyhow::Result<ItemParamList> {
        let items = self.items.read().await;
        let mut list = ItemParamList::new(model);
        for ((ctx, m, _), row) in items.iter() {
            if *ctx == context && m == model {
                list.insert(row.params.clone());
            }
        }
        Ok(list)
    }

    async fn upsert_item_params(
        &self,
        context: ContextId,
        list: &ItemParamList,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut items = self.items.write().await;
        for params in list.iter() {
            let key = (context, params.model.clone(), params.item);
            match items.get_mut(&key) {
                Some(row) => {
                    // Manually pinned rows survive calibration writes.
                    if row.params.status == ItemStatus::SetManually {
                        tracing::debug!(
                            item = params.item,
                            model = params.model.as_str(),
                            "skipping upsert over manually set parameters"
                        );
                        continue;
                    }
                    row.params = params.clone();
                    row.modified_at = now;
                }
                None => {
                    items.insert(
                        key,
                        ItemParamRow {
                            params: params.clone(),
                            created_at: now,
                            modified_at: now,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn set_manually(
        &self,
        context: ContextId,
        params: ItemParameters,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut items = self.items.write().await;

        // Demote every sibling currently pinned for this (item, context);
        // at most one SetManually row may exist per item.
        for ((ctx, _, item), row) in items.iter_mut() {
            if *ctx == context
                && *item == params.item
                && row.params.status == ItemStatus::SetManually
            {
                row.params.status = ItemStatus::NotCalculated;
                row.modified_at = now;
            }
        }

        let key = (context, params.model.clone(), params.item);
        let params = ItemParameters {
            status: ItemStatus::SetManually,
            ..params
        };
        match items.get_mut(&key) {
            Some(row) => {
                row.params = params;
                row.modified_at = now;
            }
            None => {
                items.insert(
                    key,
                    ItemParamRow {
                        params,
                        created_at: now,
                        modified_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_item_status(
        &self,
        context: ContextId,
        model: &str,
        item: ItemId,
        status: ItemStatus,
    ) -> anyhow::Result<()> {
        let mut items = self.items.write().await;
        let row = items
            .get_mut(&(context, model.to_string(), item))
            .ok_or_else(|| {
                CatError::DataIntegrity(format!(
                    "no parameter row for item {item} model {model} context {context}"
                ))
            })?;
        row.params.status = status;
        row.modified_at = Utc::now();
        Ok(())
    }

    async fn load_person_params(
        &self,
        context: ContextId,
        model: &str,
    ) -> anyhow::Result<PersonParamList> {
        let persons = self.persons.read().await;
        let mut list = PersonParamList::new();
        for ((ctx, m, examinee, scale), row) in persons.iter() {
            if *ctx == context && m == model {
                list.insert(*examinee, *scale, row.ability);
            }
        }
        Ok(list)
    }

    async fn upsert_person_params(
        &self,
        context: ContextId,
        model: &str,
        list: &PersonParamList,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut persons = self.persons.write().await;
        for entry in list.iter() {
            let key = (context, model.to_string(), entry.examinee, entry.scale);
            match persons.get_mut(&key) {
                Some(row) => {
                    row.ability = entry.ability;
                    row.modified_at = now;
                }
                None => {
                    persons.insert(
                        key,
                        PersonParamRow {
                            ability: entry.ability,
                            created_at: now,
                            modified_at: now,
                        },
                    );
                }
            }
        }
        Ok(())
    }
}

/// In-memory durable [`AttemptStore`].
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    rows: RwLock<HashMap<Uuid, ProgressSnapshot>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn load(&self, attempt: Uuid) -> anyhow::Result<Option<ProgressSnapshot>> {
        Ok(self.rows.read().await.get(&attempt).cloned())
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> anyhow::Result<()> {
        self.rows
            .write()
            .await
            .insert(snapshot.attempt, snapshot.clone());
        Ok(())
    }

    async fn delete(&self, attempt: Uuid) -> anyhow::Result<()> {
        self.rows.write().await.remove(&attempt);
        Ok(())
    }
}

/// In-memory [`ResponseSource`] over a fixed response set.
#[derive(Debug, Default)]
pub struct MemoryResponseSource {
    responses: BTreeMap<ContextId, Vec<Response>>,
    hierarchy: Option<ScaleHierarchy>,
}

impl MemoryResponseSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a hierarchy so scale queries include descendant scales.
    pub fn with_hierarchy(mut self, hierarchy: ScaleHierarchy) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn add_responses(&mut self, context: ContextId, responses: Vec<Response>) {
        self.responses.entry(context).or_default().extend(responses);
    }
}

#[async_trait]
impl ResponseSource for MemoryResponseSource {
    async fn responses(
        &self,
        context: ContextId,
        scale: ScaleId,
    ) -> anyhow::Result<Vec<Response>> {
        let rows = self.responses.get(&context).cloned().unwrap_or_default();
        let filtered = rows
            .into_iter()
            .filter(|r| {
                r.scale == scale
                    || self
                        .hierarchy
                        .as_ref()
                        .is_some_and(|h| h.is_ancestor(scale, r.scale))
            })
            .collect();
        Ok(filtered)
    }
}

/// In-memory [`ActivityLog`] test double.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    seen: RwLock<HashSet<(Uuid, ItemId)>>,
    responses: RwLock<HashMap<(Uuid, ItemId), f64>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_seen(&self, attempt: Uuid, item: ItemId) {
        self.seen.write().await.insert((attempt, item));
    }

    pub async fn record_response(&self, attempt: Uuid, item: ItemId, fraction: f64) {
        self.seen.write().await.insert((attempt, item));
        self.responses.write().await.insert((attempt, item), fraction);
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn item_seen(&self, attempt: Uuid, item: ItemId) -> anyhow::Result<bool> {
        Ok(self.seen.read().await.contains(&(attempt, item)))
    }

    async fn recorded_response(
        &self,
        attempt: Uuid,
        item: ItemId,
    ) -> anyhow::Result<Option<f64>> {
        Ok(self.responses.read().await.get(&(attempt, item)).copied())
    }
}
