//! PostgreSQL store backend.
//!
//! Documents live in a single `objects` table keyed by the lowercased
//! resource id. ETags are opaque UUIDs regenerated on every write;
//! conditional saves compare against the stored value inside the UPDATE so
//! the check and the write are one statement.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use super::{ETag, Object, StoreClient, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    id TEXT PRIMARY KEY,
    data JSONB NOT NULL,
    etag TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(anyhow!("Failed to create objects table: {e}")))?;
        Ok(())
    }
}

fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl StoreClient for PostgresStore {
    async fn get(&self, id: &str) -> Result<Object, StoreError> {
        let row = sqlx::query("SELECT data, etag FROM objects WHERE id = $1")
            .bind(id.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Other(anyhow!("Failed to read object: {e}")))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        Ok(Object {
            id: id.to_string(),
            etag: row
                .try_get::<String, _>("etag")
                .map_err(|e| StoreError::Other(anyhow!("Malformed object row: {e}")))?,
            data: row
                .try_get::<serde_json::Value, _>("data")
                .map_err(|e| StoreError::Other(anyhow!("Malformed object row: {e}")))?,
        })
    }

    async fn save(
        &self,
        id: &str,
        data: &serde_json::Value,
        etag: Option<&str>,
    ) -> Result<ETag, StoreError> {
        let key = id.to_lowercase();
        let next = Uuid::new_v4().simple().to_string();

        let rows_affected = match etag {
            None => sqlx::query(
                r#"
                INSERT INTO objects (id, data, etag, updated_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (id)
                DO UPDATE SET data = EXCLUDED.data, etag = EXCLUDED.etag, updated_at = now()
                "#,
            )
            .bind(&key)
            .bind(data)
            .bind(&next)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(anyhow!("Failed to save object: {e}")))?
            .rows_affected(),
            Some(expected) => sqlx::query(
                r#"
                UPDATE objects
                SET data = $2, etag = $3, updated_at = now()
                WHERE id = $1 AND etag = $4
                "#,
            )
            .bind(&key)
            .bind(data)
            .bind(&next)
            .bind(expected)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(anyhow!("Failed to save object: {e}")))?
            .rows_affected(),
        };

        if rows_affected == 0 {
            return Err(StoreError::Concurrency { id: id.to_string() });
        }
        Ok(next)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM objects WHERE id = $1")
            .bind(id.to_lowercase())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(anyhow!("Failed to delete object: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn query(&self, prefix: &str) -> Result<Vec<Object>, StoreError> {
        let pattern = format!("{}%", escape_like(&prefix.to_lowercase()));
        let rows = sqlx::query("SELECT id, data, etag FROM objects WHERE id LIKE $1 ORDER BY id")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Other(anyhow!("Failed to query objects: {e}")))?;

        rows.into_iter()
            .map(|row| {
                Ok(Object {
                    id: row
                        .try_get::<String, _>("id")
                        .map_err(|e| StoreError::Other(anyhow!("Malformed object row: {e}")))?,
                    etag: row
                        .try_get::<String, _>("etag")
                        .map_err(|e| StoreError::Other(anyhow!("Malformed object row: {e}")))?,
                    data: row
                        .try_get::<serde_json::Value, _>("data")
                        .map_err(|e| StoreError::Other(anyhow!("Malformed object row: {e}")))?,
                })
            })
            .collect()
    }
}
