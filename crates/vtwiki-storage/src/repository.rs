//! Key-value-by-id repositories the pipeline persists into.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use vtwiki_core::{AgencyRecord, PageId, VtuberRecord};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Cutoff for "last synthesized before" queries.
pub fn stale_cutoff(age_threshold: TimeDelta) -> DateTime<Utc> {
    Utc::now() - age_threshold
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_by_id(&self, id: PageId) -> Result<Option<VtuberRecord>, StorageError>;
    /// Inserts or replaces the record keyed by its id in one write.
    async fn upsert_by_id(&self, record: &VtuberRecord) -> Result<(), StorageError>;
    /// Returns whether a record was removed.
    async fn delete_by_id(&self, id: PageId) -> Result<bool, StorageError>;
    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError>;
    async fn get_all(&self) -> Result<Vec<VtuberRecord>, StorageError>;
    /// Ids last synthesized longer than `age_threshold` ago, oldest first.
    async fn get_stale_ids(&self, age_threshold: TimeDelta) -> Result<Vec<PageId>, StorageError>;
}

#[async_trait]
pub trait AgencyRepository: Send + Sync {
    async fn get_by_id(&self, id: PageId) -> Result<Option<AgencyRecord>, StorageError>;
    async fn get_all(&self) -> Result<Vec<AgencyRecord>, StorageError>;
    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError>;
    async fn upsert_by_id(&self, record: &AgencyRecord) -> Result<(), StorageError>;
    async fn get_stale_ids(&self, age_threshold: TimeDelta) -> Result<Vec<PageId>, StorageError>;
}

/// Ids of wiki pages known not to describe a vtuber.
#[async_trait]
pub trait NonVtuberRegistry: Send + Sync {
    /// Idempotent.
    async fn create(&self, id: PageId) -> Result<(), StorageError>;
    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError>;
}
