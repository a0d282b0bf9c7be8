//! In-memory queue backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Message, MessageId, MessageLease, QueueClient, QueueError};

/// Tuning knobs for [`InMemoryQueue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How long a dequeued message stays invisible before redelivery.
    pub lock_duration: Duration,
    /// How often the dequeue stream polls for newly visible messages.
    pub poll_interval: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Process-local [`QueueClient`] with visibility-timeout semantics.
///
/// Cheap to clone; clones share the same underlying queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    options: QueueOptions,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    // Insertion order; ids stay here until the entry is acknowledged.
    order: Vec<MessageId>,
    entries: HashMap<MessageId, Entry>,
}

struct Entry {
    payload: Vec<u8>,
    dequeue_count: u32,
    visible_at: DateTime<Utc>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

impl InMemoryQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Number of messages currently held (leased or visible). Test hook.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_duration(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inner.options.lock_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// Claim the oldest visible message, if any.
    fn claim_next(&self) -> Option<Message> {
        let now = Utc::now();
        let deadline = now + self.lock_duration();
        let mut state = self.inner.state.lock();
        let State { order, entries } = &mut *state;
        for id in order.iter() {
            if let Some(entry) = entries.get_mut(id) {
                if entry.visible_at <= now {
                    entry.dequeue_count += 1;
                    entry.visible_at = deadline;
                    return Some(Message::new(
                        *id,
                        entry.dequeue_count,
                        deadline,
                        entry.payload.clone(),
                        self.inner.clone(),
                    ));
                }
            }
        }
        None
    }
}

#[async_trait]
impl MessageLease for Inner {
    async fn extend(&self, id: MessageId) -> Result<DateTime<Utc>, QueueError> {
        let lock = chrono::Duration::from_std(self.options.lock_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let deadline = Utc::now() + lock;
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&id).ok_or(QueueError::LeaseLost(id))?;
        entry.visible_at = deadline;
        Ok(deadline)
    }

    async fn finish(&self, id: MessageId, err: Option<anyhow::Error>) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        match err {
            None => {
                state.entries.remove(&id).ok_or(QueueError::LeaseLost(id))?;
                state.order.retain(|queued| *queued != id);
            }
            Some(err) => {
                tracing::debug!(message_id = %id, error = %err, "Message abandoned, releasing lease");
                let entry = state.entries.get_mut(&id).ok_or(QueueError::LeaseLost(id))?;
                entry.visible_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        let id = MessageId::from(Uuid::new_v4());
        let mut state = self.inner.state.lock();
        state.order.push(id);
        state.entries.insert(
            id,
            Entry {
                payload,
                dequeue_count: 0,
                visible_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn dequeue(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Message>, QueueError> {
        let (tx, rx) = mpsc::channel(1);
        let queue = self.clone();
        let poll_interval = self.inner.options.poll_interval;
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match queue.claim_next() {
                    Some(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_queue(lock: Duration) -> InMemoryQueue {
        InMemoryQueue::new(QueueOptions {
            lock_duration: lock,
            poll_interval: Duration::from_millis(5),
        })
    }

    #[tokio::test]
    async fn enqueue_dequeue_finish() {
        let queue = fast_queue(Duration::from_secs(10));
        queue.enqueue(b"work".to_vec()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = queue.dequeue(cancel.clone()).await.unwrap();
        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload, b"work");
        assert_eq!(message.dequeue_count, 1);

        message.finish(None).await.unwrap();
        assert!(queue.is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn leased_message_is_invisible_to_second_consumer() {
        let queue = fast_queue(Duration::from_secs(10));
        queue.enqueue(b"one".to_vec()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = queue.dequeue(cancel.clone()).await.unwrap();
        let _held = rx.recv().await.unwrap();

        let mut rx2 = queue.dequeue(cancel.clone()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), rx2.recv()).await;
        assert!(second.is_err(), "leased message must not be redelivered");
        cancel.cancel();
    }

    #[tokio::test]
    async fn unacknowledged_message_is_redelivered_after_lease_expiry() {
        let queue = fast_queue(Duration::from_millis(30));
        queue.enqueue(b"retry".to_vec()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = queue.dequeue(cancel.clone()).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.dequeue_count, 1);
        drop(first); // walk away without finishing

        let second = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("message should be redelivered")
            .unwrap();
        assert_eq!(second.dequeue_count, 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn extend_pushes_out_redelivery() {
        let queue = fast_queue(Duration::from_millis(60));
        queue.enqueue(b"long".to_vec()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = queue.dequeue(cancel.clone()).await.unwrap();
        let mut message = rx.recv().await.unwrap();

        let before = message.next_visible_at;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after = message.extend().await.unwrap();
        assert!(after > before);

        // Within the extended lease the message must not reappear.
        let redelivered = tokio::time::timeout(Duration::from_millis(40), rx.recv()).await;
        assert!(redelivered.is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn finish_with_error_releases_immediately() {
        let queue = fast_queue(Duration::from_secs(10));
        queue.enqueue(b"again".to_vec()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = queue.dequeue(cancel.clone()).await.unwrap();
        let message = rx.recv().await.unwrap();
        message
            .finish(Some(anyhow::anyhow!("controller unavailable")))
            .await
            .unwrap();

        let redelivered = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("abandoned message should be redelivered")
            .unwrap();
        assert_eq!(redelivered.dequeue_count, 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn finish_after_finish_reports_lease_lost() {
        let queue = fast_queue(Duration::from_secs(10));
        queue.enqueue(b"x".to_vec()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = queue.dequeue(cancel.clone()).await.unwrap();
        let message = rx.recv().await.unwrap();
        let id = message.id;
        message.finish(None).await.unwrap();

        // A second settle for the same id is a lost lease.
        let lease: Arc<dyn MessageLease> = queue.inner.clone();
        let err = lease.finish(id, None).await.unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost(_)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn dequeue_stream_ends_on_cancel() {
        let queue = fast_queue(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let mut rx = queue.dequeue(cancel.clone()).await.unwrap();
        cancel.cancel();
        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("stream should close promptly");
        assert!(got.is_none());
    }
}
