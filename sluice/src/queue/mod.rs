//! Leased work queues with at-least-once delivery.
//!
//! A producer enqueues an opaque payload; a consumer opens a dequeue stream
//! and receives [`Message`]s holding exclusive leases. While a message is
//! leased it is invisible to other consumers. The consumer either extends
//! the lease ([`Message::extend`]), acknowledges it ([`Message::finish`]
//! with `None`), or walks away, in which case the broker redelivers the
//! message once the lease expires. `dequeue_count` tracks redeliveries so
//! consumers can detect poison messages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryQueue, QueueOptions};

/// Unique identifier for a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        MessageId(uuid)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The message is no longer leased by this consumer (acknowledged,
    /// expired, or claimed elsewhere).
    #[error("lease lost for message {0}")]
    LeaseLost(MessageId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Lease operations a [`Message`] delegates back to its queue.
#[async_trait]
pub trait MessageLease: Send + Sync {
    /// Push the visibility deadline out by the queue's lock duration.
    /// Returns the new deadline.
    async fn extend(&self, id: MessageId) -> Result<DateTime<Utc>, QueueError>;

    /// Settle the message. `err = None` acknowledges and removes it;
    /// `Some` abandons the lease so the message is redelivered immediately.
    async fn finish(&self, id: MessageId, err: Option<anyhow::Error>) -> Result<(), QueueError>;
}

/// A dequeued message holding an exclusive lease.
pub struct Message {
    pub id: MessageId,
    /// Number of times this message has been dequeued, this delivery included.
    pub dequeue_count: u32,
    /// When the current lease expires and the broker may redeliver.
    pub next_visible_at: DateTime<Utc>,
    pub payload: Vec<u8>,
    lease: Arc<dyn MessageLease>,
}

impl Message {
    pub fn new(
        id: MessageId,
        dequeue_count: u32,
        next_visible_at: DateTime<Utc>,
        payload: Vec<u8>,
        lease: Arc<dyn MessageLease>,
    ) -> Self {
        Self {
            id,
            dequeue_count,
            next_visible_at,
            payload,
            lease,
        }
    }

    /// Extend the lease, updating `next_visible_at` on success.
    pub async fn extend(&mut self) -> Result<DateTime<Utc>, QueueError> {
        let deadline = self.lease.extend(self.id).await?;
        self.next_visible_at = deadline;
        Ok(deadline)
    }

    /// Settle the message; see [`MessageLease::finish`].
    pub async fn finish(self, err: Option<anyhow::Error>) -> Result<(), QueueError> {
        self.lease.finish(self.id, err).await
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("dequeue_count", &self.dequeue_count)
            .field("next_visible_at", &self.next_visible_at)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Work queue interface.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Open a dequeue stream. Messages arrive as they become visible; the
    /// stream ends when `cancel` fires or the receiver is dropped.
    async fn dequeue(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Message>, QueueError>;
}
