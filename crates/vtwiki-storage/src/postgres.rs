//! PostgreSQL repositories storing one JSONB document per record.

use async_trait::async_trait;
use chrono::TimeDelta;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use vtwiki_core::{AgencyRecord, PageId, VtuberRecord};

use crate::repository::{
    stale_cutoff, AgencyRepository, NonVtuberRegistry, ProfileRepository, StorageError,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn ids_from_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<PageId>, StorageError> {
    rows.iter()
        .map(|row| row.try_get::<i64, _>("id").map_err(StorageError::from))
        .collect()
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn get_by_id(&self, id: PageId) -> Result<Option<VtuberRecord>, StorageError> {
        let row = sqlx::query("SELECT doc FROM vtubers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<Json<VtuberRecord>, _>("doc")?.0),
            None => None,
        })
    }

    async fn upsert_by_id(&self, record: &VtuberRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO vtubers (id, doc, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at",
        )
        .bind(record.id())
        .bind(Json(record))
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_id(&self, id: PageId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM vtubers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError> {
        let rows = sqlx::query("SELECT id FROM vtubers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        ids_from_rows(rows)
    }

    async fn get_all(&self) -> Result<Vec<VtuberRecord>, StorageError> {
        let rows = sqlx::query("SELECT doc FROM vtubers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<Json<VtuberRecord>, _>("doc")
                    .map(|doc| doc.0)
                    .map_err(StorageError::from)
            })
            .collect()
    }

    async fn get_stale_ids(&self, age_threshold: TimeDelta) -> Result<Vec<PageId>, StorageError> {
        let rows = sqlx::query("SELECT id FROM vtubers WHERE updated_at < $1 ORDER BY updated_at, id")
            .bind(stale_cutoff(age_threshold))
            .fetch_all(&self.pool)
            .await?;
        ids_from_rows(rows)
    }
}

#[async_trait]
impl AgencyRepository for PgStore {
    async fn get_by_id(&self, id: PageId) -> Result<Option<AgencyRecord>, StorageError> {
        let row = sqlx::query("SELECT doc FROM agencies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<Json<AgencyRecord>, _>("doc")?.0),
            None => None,
        })
    }

    async fn get_all(&self) -> Result<Vec<AgencyRecord>, StorageError> {
        let rows = sqlx::query("SELECT doc FROM agencies ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<Json<AgencyRecord>, _>("doc")
                    .map(|doc| doc.0)
                    .map_err(StorageError::from)
            })
            .collect()
    }

    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError> {
        let rows = sqlx::query("SELECT id FROM agencies ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        ids_from_rows(rows)
    }

    async fn upsert_by_id(&self, record: &AgencyRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO agencies (id, doc, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at",
        )
        .bind(record.agency.id)
        .bind(Json(record))
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_stale_ids(&self, age_threshold: TimeDelta) -> Result<Vec<PageId>, StorageError> {
        let rows = sqlx::query("SELECT id FROM agencies WHERE updated_at < $1 ORDER BY updated_at, id")
            .bind(stale_cutoff(age_threshold))
            .fetch_all(&self.pool)
            .await?;
        ids_from_rows(rows)
    }
}

#[async_trait]
impl NonVtuberRegistry for PgStore {
    async fn create(&self, id: PageId) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO non_vtubers (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all_ids(&self) -> Result<Vec<PageId>, StorageError> {
        let rows = sqlx::query("SELECT id FROM non_vtubers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        ids_from_rows(rows)
    }
}
