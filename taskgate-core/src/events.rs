//! Push surface: republishes committed task transitions to subscribers.
//!
//! The registry publishes while it still holds the per-task lock, so each
//! subscriber receives snapshots in commit order. Subscriber queues are
//! unbounded; a task has a finite number of transitions, so a slow consumer
//! never causes a missed event.

use dashmap::DashMap;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::task::{Task, TaskId, TaskSnapshot};

// ============================================================================
// Event Publisher
// ============================================================================

/// Fan-out of task snapshots to per-subscriber queues.
#[derive(Debug, Default)]
pub struct EventPublisher {
    subscribers: DashMap<TaskId, Vec<mpsc::UnboundedSender<TaskSnapshot>>>,
}

impl EventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber for future events of `id`.
    ///
    /// Must be called under the registry's lock for `id` so that no commit
    /// can slip between the caller's state check and the attachment.
    pub(crate) fn attach(&self, id: &TaskId) -> TaskEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(id.clone()).or_default().push(tx);
        TaskEventStream::new(rx)
    }

    /// Publishes a committed task state.
    ///
    /// A terminal snapshot is the last event: its subscribers are dropped
    /// after delivery, which ends their streams.
    pub(crate) fn publish(&self, task: &Task) {
        if task.is_terminal() {
            if let Some((_, senders)) = self.subscribers.remove(&task.id) {
                let snapshot = task.snapshot();
                for tx in senders {
                    let _ = tx.send(snapshot.clone());
                }
            }
            return;
        }

        let mut now_empty = false;
        if let Some(mut senders) = self.subscribers.get_mut(&task.id) {
            let snapshot = task.snapshot();
            senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
            now_empty = senders.is_empty();
        }
        if now_empty {
            self.subscribers.remove_if(&task.id, |_, v| v.is_empty());
        }
    }

    /// Drops every subscriber of `id` without a final event.
    pub(crate) fn close(&self, id: &TaskId) {
        self.subscribers.remove(id);
    }

    /// Number of live subscribers for `id`.
    #[must_use]
    pub fn subscriber_count(&self, id: &TaskId) -> usize {
        self.subscribers
            .get(id)
            .map(|s| s.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

// ============================================================================
// Event Stream
// ============================================================================

/// Finite stream of snapshots for one task.
///
/// Yields one snapshot per committed transition and ends right after the
/// terminal one. A stream is not restartable; after a disconnect the
/// consumer falls back to polling.
#[derive(Debug)]
pub struct TaskEventStream {
    rx: Option<mpsc::UnboundedReceiver<TaskSnapshot>>,
}

impl TaskEventStream {
    fn new(rx: mpsc::UnboundedReceiver<TaskSnapshot>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A stream that ends immediately (subscription to a finished task).
    #[must_use]
    pub fn empty() -> Self {
        Self { rx: None }
    }
}

impl Stream for TaskEventStream {
    type Item = TaskSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(snapshot)) => {
                if snapshot.state.is_terminal() {
                    self.rx = None;
                }
                Poll::Ready(Some(snapshot))
            }
            Poll::Ready(None) => {
                self.rx = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
