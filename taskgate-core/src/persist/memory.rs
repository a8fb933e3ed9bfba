//! In-process durable store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

use super::{DurableStore, StoreError, is_expired};
use crate::task::{Task, TaskId};

/// Store backed by a concurrent map. Contents do not survive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<TaskId, Task>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, task: &Task) -> Result<(), StoreError> {
        self.records.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        self.records.remove(id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    async fn purge_expired(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records
            .retain(|_, task| !is_expired(task, retention, now));
        Ok(before.saturating_sub(self.records.len()))
    }
}
