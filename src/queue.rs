//! In-memory FIFO retry queue.
//!
//! Holds raw (unframed) HL7 payloads awaiting delivery to a peer that is
//! currently unreachable. Ordering is preserved: a write failure during
//! drain re-queues the payload at the head rather than the tail, so the
//! next drain attempt retries the same message before moving on.
//!
//! [`forward_or_enqueue`](RetryQueue::forward_or_enqueue) and
//! [`drain_one`](RetryQueue::drain_one) hold the queue's lock across the
//! write they guard, not just across the decision that precedes it. A
//! decision ("queue looks empty, write directly") and the drain's own
//! dequeue-then-write are otherwise two separate critical sections: the
//! drain can pop an entry, and before it finishes writing that entry a
//! concurrent direct forward can observe the now-empty queue and write
//! its own (newer) record first, landing it on the wire ahead of the
//! older, already-dequeued one. Holding one lock across "check or pop" and
//! the write closes that window — only one of the two paths can be
//! touching the destination at a time.

use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::Mutex;

/// An entry waiting to be forwarded, plus whether the original sender is
/// still owed an ACK once this entry is successfully delivered.
pub struct QueuedMessage {
    pub payload: Vec<u8>,
    pub ack_owed: bool,
}

/// Result of [`RetryQueue::forward_or_enqueue`].
pub enum ForwardOutcome {
    WrittenDirect,
    Enqueued,
}

/// Result of [`RetryQueue::drain_one`] when the queue was non-empty.
pub enum DrainOutcome {
    Delivered(QueuedMessage),
    Failed(std::io::Error),
}

#[derive(Default)]
pub struct RetryQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_back(&self, payload: Vec<u8>, ack_owed: bool) {
        self.inner
            .lock()
            .await
            .push_back(QueuedMessage { payload, ack_owed });
    }

    pub async fn push_front(&self, entry: QueuedMessage) {
        self.inner.lock().await.push_front(entry);
    }

    pub async fn pop_front(&self) -> Option<QueuedMessage> {
        self.inner.lock().await.pop_front()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// If the queue is non-empty, enqueue `payload` and return
    /// `Enqueued`. Otherwise call `write` with the payload while still
    /// holding the queue's lock; on success return `WrittenDirect`, on
    /// failure requeue at the head (still under the lock) and return
    /// `Enqueued`. Holding the lock through the write — not releasing it
    /// after the emptiness check — is what prevents `drain_one` from
    /// popping and writing an older entry concurrently with this one.
    pub async fn forward_or_enqueue<F, Fut>(
        &self,
        payload: Vec<u8>,
        ack_owed: bool,
        write: F,
    ) -> ForwardOutcome
    where
        F: FnOnce(Vec<u8>) -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let mut guard = self.inner.lock().await;
        if !guard.is_empty() {
            guard.push_back(QueuedMessage { payload, ack_owed });
            return ForwardOutcome::Enqueued;
        }
        match write(payload.clone()).await {
            Ok(()) => ForwardOutcome::WrittenDirect,
            Err(_) => {
                guard.push_front(QueuedMessage { payload, ack_owed });
                ForwardOutcome::Enqueued
            }
        }
    }

    /// Pop the head entry (if any) and hand its payload to `write` while
    /// still holding the queue's lock, so a concurrent
    /// `forward_or_enqueue` cannot observe "empty" and write past this
    /// entry before it lands. Returns `None` if the queue was empty. On
    /// write failure the entry is put back at the head before returning.
    pub async fn drain_one<F, Fut>(&self, write: F) -> Option<DrainOutcome>
    where
        F: FnOnce(&[u8]) -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let mut guard = self.inner.lock().await;
        let entry = guard.pop_front()?;
        match write(&entry.payload).await {
            Ok(()) => Some(DrainOutcome::Delivered(entry)),
            Err(e) => {
                guard.push_front(entry);
                Some(DrainOutcome::Failed(e))
            }
        }
    }
}
