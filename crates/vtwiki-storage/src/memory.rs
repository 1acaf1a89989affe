//! In-memory repositories for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::sync::RwLock;
use vtwiki_core::{AgencyRecord, PageId, VtuberRecord};

use crate::repository::{
    stale_cutoff, AgencyRepository, NonVtuberRegistry, ProfileRepository, StorageError,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: RwLock<BTreeMap<PageId, VtuberRecord>>,
    agencies: RwLock<BTreeMap<PageId, AgencyRecord>>,
    non_vtubers: RwLock<BTreeSet<PageId>>,
    profile_writes: RwLock<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of profile upserts so far.
    pub async fn profile_writes(&self) -> usize {
        *self.profile_writes.read().await
    }

    pub async fn is_non_vtuber(&self, id: PageId) -> bool {
        self.non_vtubers.read().await.contains(&id)
    }
}

fn oldest_first(
    rows: impl Iterator<Item = (PageId, chrono::DateTime<chrono::Utc>)>,
    age_threshold: TimeDelta,
) -> Vec<PageId> {
    let cutoff = stale_cutoff(age_threshold);
    let mut stale = rows
        .filter(|(_, updated_at)| *updated_at < cutoff)
        .collect::<Vec<_>>();
    stale.sort_by_key(|(id, updated_at)| (*updated_at, *id));
    stale.into_iter().map(|(id, _)| id).collect()
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn get_by_id(&self, id: PageId) -> Result<Option<VtuberRecord>, StorageError> {
        Ok(self.profiles.read().await.get(&id).cloned())
    }

    async fn upsert_by_id(&self, record: &VtuberRecord) -> Result<(), StorageError> {
        self.profiles
            .write()
            .await
            .insert(record.id(), record.clone());
        *self.profile_writes.write().await += 1;
        Ok(())
    }

    async fn delete_by_id(&self, id: PageId) -> Result<bool, StorageError> {
        Ok(self.profiles.write().await.remove(&id).is_some())
    }

    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError> {
        Ok(self.profiles.read().await.keys().copied().collect())
    }

    async fn get_all(&self) -> Result<Vec<VtuberRecord>, StorageError> {
        Ok(self.profiles.read().await.values().cloned().collect())
    }

    async fn get_stale_ids(&self, age_threshold: TimeDelta) -> Result<Vec<PageId>, StorageError> {
        let profiles = self.profiles.read().await;
        Ok(oldest_first(
            profiles.values().map(|r| (r.id(), r.updated_at)),
            age_threshold,
        ))
    }
}

#[async_trait]
impl AgencyRepository for MemoryStore {
    async fn get_by_id(&self, id: PageId) -> Result<Option<AgencyRecord>, StorageError> {
        Ok(self.agencies.read().await.get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<AgencyRecord>, StorageError> {
        Ok(self.agencies.read().await.values().cloned().collect())
    }

    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError> {
        Ok(self.agencies.read().await.keys().copied().collect())
    }

    async fn upsert_by_id(&self, record: &AgencyRecord) -> Result<(), StorageError> {
        self.agencies
            .write()
            .await
            .insert(record.agency.id, record.clone());
        Ok(())
    }

    async fn get_stale_ids(&self, age_threshold: TimeDelta) -> Result<Vec<PageId>, StorageError> {
        let agencies = self.agencies.read().await;
        Ok(oldest_first(
            agencies.values().map(|r| (r.agency.id, r.updated_at)),
            age_threshold,
        ))
    }
}

#[async_trait]
impl NonVtuberRegistry for MemoryStore {
    async fn create(&self, id: PageId) -> Result<(), StorageError> {
        self.non_vtubers.write().await.insert(id);
        Ok(())
    }

    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError> {
        Ok(self.non_vtubers.read().await.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vtwiki_core::Vtuber;

    fn record(id: PageId, hours_ago: i64) -> VtuberRecord {
        let at = Utc::now() - Duration::hours(hours_ago);
        VtuberRecord {
            vtuber: Vtuber {
                id,
                name: format!("vtuber-{id}"),
                ..Default::default()
            },
            overridden: Default::default(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn stale_ids_are_returned_oldest_first() {
        let store = MemoryStore::new();
        ProfileRepository::upsert_by_id(&store, &record(1, 30)).await.unwrap();
        ProfileRepository::upsert_by_id(&store, &record(2, 1)).await.unwrap();
        ProfileRepository::upsert_by_id(&store, &record(3, 72)).await.unwrap();

        let stale = ProfileRepository::get_stale_ids(&store, Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(stale, vec![3, 1]);
    }

    #[tokio::test]
    async fn non_vtuber_registration_is_idempotent() {
        let store = MemoryStore::new();
        store.create(9).await.unwrap();
        store.create(9).await.unwrap();
        assert_eq!(NonVtuberRegistry::get_all_ids(&store).await.unwrap(), vec![9]);
    }
}
