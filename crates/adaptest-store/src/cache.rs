//! Volatile progress cache.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use adaptest_core::attempt::ProgressSnapshot;
use adaptest_core::traits::ProgressCache;
use adaptest_core::ExamineeId;

/// In-memory [`ProgressCache`] keyed by (examinee, attempt).
///
/// Mirrors the durable attempt store for cheap reads; it may be dropped at
/// any time, the store remains the source of truth.
#[derive(Debug, Default)]
pub struct MemoryProgressCache {
    entries: RwLock<HashMap<(ExamineeId, Uuid), ProgressSnapshot>>,
}

impl MemoryProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ProgressCache for MemoryProgressCache {
    async fn get(&self, examinee: ExamineeId, attempt: Uuid) -> Option<ProgressSnapshot> {
        self.entries.read().await.get(&(examinee, attempt)).cloned()
    }

    async fn put(&self, snapshot: ProgressSnapshot) {
        self.entries
            .write()
            .await
            .insert((snapshot.examinee, snapshot.attempt), snapshot);
    }

    async fn invalidate(&self, examinee: ExamineeId, attempt: Uuid) {
        self.entries.write().await.remove(&(examinee, attempt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptest_core::config::QuizConfig;
    use chrono::Utc;

    #[tokio::test]
    async fn put_get_invalidate() {
        let cache = MemoryProgressCache::new();
        let snapshot =
            ProgressSnapshot::new(Uuid::new_v4(), 5, 1, QuizConfig::default(), Utc::now());
        let attempt = snapshot.attempt;

        assert!(cache.get(5, attempt).await.is_none());
        cache.put(snapshot.clone()).await;
        assert_eq!(cache.get(5, attempt).await.unwrap(), snapshot);
        // Keyed by examinee too.
        assert!(cache.get(6, attempt).await.is_none());

        cache.invalidate(5, attempt).await;
        assert!(cache.get(5, attempt).await.is_none());
    }
}
