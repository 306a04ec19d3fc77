use crate::error::StoreError;
use crate::store::EntityStore;
use crate::types::{EntityRecord, HistoryEntry};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Postgres-backed EntityStore.
///
/// The CAS contract is carried by a version-guarded UPDATE: the row is only
/// touched when its stored version still equals the one the record was
/// loaded at, and the state write, history append, and version bump happen
/// in that single statement. A zero-row UPDATE is disambiguated with a
/// follow-up existence probe (gone row vs stale version).
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e)))?;
        Ok(Self::new(pool))
    }

    /// Create the entity_records table and its lookup index if absent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_records (
                id UUID PRIMARY KEY,
                entity_type TEXT NOT NULL,
                state TEXT NOT NULL,
                payload JSONB NOT NULL,
                history JSONB NOT NULL DEFAULT '[]'::jsonb,
                version BIGINT NOT NULL DEFAULT 0,
                submitted_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entity_records_type_state \
             ON entity_records (entity_type, state)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e)))?;

        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM entity_records WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(anyhow!(e)))?;
        Ok(found)
    }
}

fn record_from_row(row: &PgRow) -> Result<EntityRecord, StoreError> {
    let history_json: serde_json::Value = row
        .try_get("history")
        .map_err(|e| StoreError::Backend(anyhow!(e)))?;
    let history: Vec<HistoryEntry> =
        serde_json::from_value(history_json).map_err(|e| StoreError::Backend(anyhow!(e)))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Backend(anyhow!(e)))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StoreError::Backend(anyhow!(e)))?;

    Ok(EntityRecord {
        id: row
            .try_get("id")
            .map_err(|e| StoreError::Backend(anyhow!(e)))?,
        entity_type: row
            .try_get("entity_type")
            .map_err(|e| StoreError::Backend(anyhow!(e)))?,
        state: row
            .try_get("state")
            .map_err(|e| StoreError::Backend(anyhow!(e)))?,
        payload: row
            .try_get("payload")
            .map_err(|e| StoreError::Backend(anyhow!(e)))?,
        history,
        version: version as u64,
        submitted_by: row
            .try_get("submitted_by")
            .map_err(|e| StoreError::Backend(anyhow!(e)))?,
        created_at: created_at.timestamp_millis(),
    })
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn insert(&self, record: &EntityRecord) -> Result<(), StoreError> {
        let history =
            serde_json::to_value(&record.history).map_err(|e| StoreError::Backend(anyhow!(e)))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(record.created_at)
            .ok_or_else(|| StoreError::Backend(anyhow!("created_at out of range")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO entity_records
                (id, entity_type, state, payload, history, version, submitted_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.entity_type)
        .bind(&record.state)
        .bind(&record.payload)
        .bind(history)
        .bind(record.version as i64)
        .bind(&record.submitted_by)
        .bind(created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let unique_violation = e
                    .as_database_error()
                    .map(|d| d.kind() == sqlx::error::ErrorKind::UniqueViolation)
                    .unwrap_or(false);
                if unique_violation {
                    Err(StoreError::DuplicateId(record.id))
                } else {
                    Err(StoreError::Backend(anyhow!(e)))
                }
            }
        }
    }

    async fn load(&self, id: Uuid) -> Result<EntityRecord, StoreError> {
        let row = sqlx::query(
            "SELECT id, entity_type, state, payload, history, version, submitted_by, created_at \
             FROM entity_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e)))?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn commit(
        &self,
        record: &EntityRecord,
        entry: HistoryEntry,
    ) -> Result<EntityRecord, StoreError> {
        let entry_json =
            serde_json::to_value(&entry).map_err(|e| StoreError::Backend(anyhow!(e)))?;

        let row = sqlx::query(
            r#"
            UPDATE entity_records
            SET state = $3,
                history = history || $4::jsonb,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING id, entity_type, state, payload, history, version, submitted_by, created_at
            "#,
        )
        .bind(record.id)
        .bind(record.version as i64)
        .bind(&record.state)
        .bind(entry_json)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow!(e)))?;

        match row {
            Some(row) => record_from_row(&row),
            None if self.exists(record.id).await? => Err(StoreError::Conflict(record.id)),
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM entity_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow!(e)))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}
