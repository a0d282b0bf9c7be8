//! PostgreSQL queue backend.
//!
//! Messages live in a `queue_messages` table; claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent consumers never double-claim.
//! Visibility is a timestamp column: a claim pushes `visible_at` into the
//! future, lease extension pushes it again, acknowledgement deletes the
//! row, and a crashed consumer's rows simply become visible again once
//! their deadline passes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Message, MessageId, MessageLease, QueueClient, QueueError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages (
    id UUID PRIMARY KEY,
    payload BYTEA NOT NULL,
    dequeue_count INT NOT NULL DEFAULT 0,
    visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS queue_messages_visibility_idx
    ON queue_messages (visible_at, enqueued_at)
"#;

/// Tuning knobs for [`PostgresQueue`].
#[derive(Debug, Clone)]
pub struct PostgresQueueOptions {
    pub lock_duration: Duration,
    pub poll_interval: Duration,
}

impl Default for PostgresQueueOptions {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    options: PostgresQueueOptions,
}

impl PostgresQueue {
    pub fn new(pool: PgPool, options: PostgresQueueOptions) -> Self {
        Self { pool, options }
    }

    /// Create the backing table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        for statement in SCHEMA.split(';') {
            if statement.trim().is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::Other(anyhow!("Failed to create queue table: {e}")))?;
        }
        Ok(())
    }

    fn lease_deadline(&self) -> DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(self.options.lock_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// Claim the oldest visible message, if any.
    async fn claim_next(&self) -> Result<Option<Message>, QueueError> {
        let deadline = self.lease_deadline();
        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET dequeue_count = dequeue_count + 1, visible_at = $1
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE visible_at <= now()
                ORDER BY enqueued_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, dequeue_count
            "#,
        )
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Other(anyhow!("Failed to claim message: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: Uuid = row
            .try_get("id")
            .map_err(|e| QueueError::Other(anyhow!("Malformed message row: {e}")))?;
        let payload: Vec<u8> = row
            .try_get("payload")
            .map_err(|e| QueueError::Other(anyhow!("Malformed message row: {e}")))?;
        let dequeue_count: i32 = row
            .try_get("dequeue_count")
            .map_err(|e| QueueError::Other(anyhow!("Malformed message row: {e}")))?;

        Ok(Some(Message::new(
            MessageId::from(id),
            dequeue_count.max(0) as u32,
            deadline,
            payload,
            Arc::new(self.clone()),
        )))
    }
}

#[async_trait]
impl MessageLease for PostgresQueue {
    async fn extend(&self, id: MessageId) -> Result<DateTime<Utc>, QueueError> {
        let deadline = self.lease_deadline();
        let result = sqlx::query(
            "UPDATE queue_messages SET visible_at = $2 WHERE id = $1 AND visible_at > now()",
        )
        .bind(id.0)
        .bind(deadline)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Other(anyhow!("Failed to extend lease: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(id));
        }
        Ok(deadline)
    }

    async fn finish(&self, id: MessageId, err: Option<anyhow::Error>) -> Result<(), QueueError> {
        let result = match err {
            None => sqlx::query("DELETE FROM queue_messages WHERE id = $1")
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::Other(anyhow!("Failed to acknowledge message: {e}")))?,
            Some(err) => {
                tracing::debug!(message_id = %id, error = %err, "Message abandoned, releasing lease");
                sqlx::query("UPDATE queue_messages SET visible_at = now() WHERE id = $1")
                    .bind(id.0)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| QueueError::Other(anyhow!("Failed to release message: {e}")))?
            }
        };

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(id));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for PostgresQueue {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO queue_messages (id, payload) VALUES ($1, $2)")
            .bind(Uuid::new_v4())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Other(anyhow!("Failed to enqueue message: {e}")))?;
        Ok(())
    }

    async fn dequeue(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Message>, QueueError> {
        let (tx, rx) = mpsc::channel(1);
        let queue = self.clone();
        let poll_interval = self.options.poll_interval;
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match queue.claim_next().await {
                    Ok(Some(message)) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to poll queue, backing off");
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        });
        Ok(rx)
    }
}
