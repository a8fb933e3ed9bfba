//! Input broker: a per-task rendezvous between an executor waiting for
//! input and a client delivering it.
//!
//! At most one slot exists per task. A slot is created by the executor
//! before it commits `input_required` and is consumed by exactly one
//! successful delivery. The executor acknowledges the delivery once it has
//! committed the resume, so the client's call returns only after the task
//! has left `input_required`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::task::{InputRequest, TaskId};

// ============================================================================
// Errors
// ============================================================================

/// A slot is already open for this task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Task '{0}' is already waiting for input")]
pub struct AlreadyWaiting(pub TaskId);

/// Why a delivery was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// No open slot (never asked, already answered, or timed out)
    #[error("Task is not waiting for input")]
    NotWaiting,

    /// Value does not satisfy the request; the slot stays open
    #[error("{0}")]
    InvalidInput(String),
}

// ============================================================================
// Delivery
// ============================================================================

/// A value handed to the executor, plus the acknowledgement it owes.
#[derive(Debug)]
pub struct Delivery {
    value: Value,
    ack: oneshot::Sender<()>,
}

impl Delivery {
    /// Peeks at the delivered value without acknowledging it.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Acknowledges the delivery and returns the value.
    ///
    /// Call only after the resume has been committed.
    pub fn accept(self) -> Value {
        let _ = self.ack.send(());
        self.value
    }
}

// ============================================================================
// Broker
// ============================================================================

#[derive(Debug)]
struct Slot {
    tx: oneshot::Sender<Delivery>,
    request: InputRequest,
    token: u64,
}

/// Per-task input slots.
#[derive(Debug, Default)]
pub struct InputBroker {
    slots: DashMap<TaskId, Slot>,
    next_token: AtomicU64,
}

impl InputBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the input slot for `id`.
    ///
    /// The returned waiter owns the slot; dropping it closes the slot, so an
    /// executor that stops waiting (timeout, cancellation, panic) never
    /// leaves a slot a client could deliver into.
    pub fn register(
        self: &Arc<Self>,
        id: &TaskId,
        request: InputRequest,
    ) -> Result<InputWaiter, AlreadyWaiting> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => Err(AlreadyWaiting(id.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { tx, request, token });
                Ok(InputWaiter {
                    broker: Arc::clone(self),
                    id: id.clone(),
                    token,
                    rx,
                })
            }
        }
    }

    /// Delivers `value` to the executor waiting on `id`.
    ///
    /// The value is validated against the open request first. An invalid
    /// value leaves the slot open. On success the slot is consumed and the
    /// returned receiver resolves once the executor has committed the
    /// resume.
    pub fn provide(
        &self,
        id: &TaskId,
        value: Value,
    ) -> Result<oneshot::Receiver<()>, DeliveryError> {
        let slot = match self.slots.entry(id.clone()) {
            Entry::Vacant(_) => return Err(DeliveryError::NotWaiting),
            Entry::Occupied(occupied) => {
                occupied
                    .get()
                    .request
                    .validate(&value)
                    .map_err(DeliveryError::InvalidInput)?;
                occupied.remove()
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        slot.tx
            .send(Delivery { value, ack: ack_tx })
            .map_err(|_| DeliveryError::NotWaiting)?;
        Ok(ack_rx)
    }

    /// Closes the slot for `id`, if any.
    pub fn discard(&self, id: &TaskId) {
        self.slots.remove(id);
    }

    /// True if `id` has an open slot.
    #[must_use]
    pub fn is_waiting(&self, id: &TaskId) -> bool {
        self.slots.contains_key(id)
    }

    fn release(&self, id: &TaskId, token: u64) {
        self.slots.remove_if(id, |_, slot| slot.token == token);
    }
}

/// Executor side of an open slot.
#[derive(Debug)]
pub struct InputWaiter {
    broker: Arc<InputBroker>,
    id: TaskId,
    token: u64,
    rx: oneshot::Receiver<Delivery>,
}

impl InputWaiter {
    /// Waits for a delivery. Returns `None` if the slot was discarded.
    pub async fn recv(&mut self) -> Option<Delivery> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for InputWaiter {
    fn drop(&mut self) {
        self.broker.release(&self.id, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_delivery_and_ack() {
        let broker = Arc::new(InputBroker::new());
        let id = TaskId::new();
        let mut waiter = broker
            .register(&id, InputRequest::confirmation("Proceed?"))
            .unwrap();

        let ack = broker.provide(&id, json!(true)).unwrap();
        assert!(!broker.is_waiting(&id));

        let delivery = waiter.recv().await.unwrap();
        assert_eq!(delivery.accept(), json!(true));
        ack.await.unwrap();
    }

    #[test]
    fn test_second_slot_rejected() {
        let broker = Arc::new(InputBroker::new());
        let id = TaskId::new();
        let _waiter = broker.register(&id, InputRequest::text("name?")).unwrap();

        let err = broker
            .register(&id, InputRequest::text("again?"))
            .unwrap_err();
        assert_eq!(err, AlreadyWaiting(id));
    }

    #[test]
    fn test_provide_without_slot() {
        let broker = InputBroker::new();
        assert_eq!(
            broker.provide(&TaskId::new(), json!("x")).unwrap_err(),
            DeliveryError::NotWaiting
        );
    }

    #[test]
    fn test_invalid_value_keeps_slot_open() {
        let broker = Arc::new(InputBroker::new());
        let id = TaskId::new();
        let _waiter = broker
            .register(&id, InputRequest::choice("Format?", ["csv", "json"]))
            .unwrap();

        let err = broker.provide(&id, json!("xml")).unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidInput(_)));
        assert!(broker.is_waiting(&id));

        assert!(broker.provide(&id, json!("csv")).is_ok());
    }

    #[test]
    fn test_only_one_delivery_wins() {
        let broker = Arc::new(InputBroker::new());
        let id = TaskId::new();
        let _waiter = broker.register(&id, InputRequest::text("name?")).unwrap();

        assert!(broker.provide(&id, json!("first")).is_ok());
        assert_eq!(
            broker.provide(&id, json!("second")).unwrap_err(),
            DeliveryError::NotWaiting
        );
    }

    #[test]
    fn test_dropped_waiter_closes_slot() {
        let broker = Arc::new(InputBroker::new());
        let id = TaskId::new();
        let waiter = broker.register(&id, InputRequest::text("name?")).unwrap();
        drop(waiter);

        assert!(!broker.is_waiting(&id));
        assert_eq!(
            broker.provide(&id, json!("late")).unwrap_err(),
            DeliveryError::NotWaiting
        );
    }

    #[test]
    fn test_stale_waiter_does_not_close_new_slot() {
        let broker = Arc::new(InputBroker::new());
        let id = TaskId::new();
        let first = broker.register(&id, InputRequest::text("a?")).unwrap();
        broker.discard(&id);
        let _second = broker.register(&id, InputRequest::text("b?")).unwrap();

        drop(first);
        assert!(broker.is_waiting(&id));
    }

    #[tokio::test]
    async fn test_discard_wakes_waiter() {
        let broker = Arc::new(InputBroker::new());
        let id = TaskId::new();
        let mut waiter = broker.register(&id, InputRequest::text("name?")).unwrap();

        broker.discard(&id);
        assert!(waiter.recv().await.is_none());
    }
}
