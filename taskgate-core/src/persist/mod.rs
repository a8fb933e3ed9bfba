//! Durable task storage.
//!
//! The registry stays the single source of truth. A durable store only
//! mirrors committed records so that a restart can report what happened to
//! tasks that were running.
//!
//! ## Module Organization
//!
//! - `mod.rs` - `DurableStore` trait, errors, and the write-behind writer
//! - `memory.rs` - In-process store
//! - `file.rs` - One JSON file per task

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{PersistenceBackend, PersistenceConfig};
use crate::task::{Task, TaskId};

// ============================================================================
// Store Errors
// ============================================================================

/// Errors from durable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be decoded
    #[error("Corrupt record at {path}: {reason}")]
    Corrupt {
        /// File holding the record
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// A record could not be encoded
    #[error("Failed to encode task record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The configured backend cannot be opened
    #[error("Persistence backend misconfigured: {reason}")]
    Misconfigured {
        /// What is missing
        reason: String,
    },
}

// ============================================================================
// Durable Store Trait
// ============================================================================

/// Interface a persistent task backend must satisfy.
///
/// Records are whole `Task` values keyed by id. Writes replace the previous
/// record.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace the record for `task.id`.
    async fn put(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetch one record.
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Remove one record. Removing a missing record is not an error.
    async fn delete(&self, id: &TaskId) -> Result<(), StoreError>;

    /// Load every record, e.g. at start-up.
    async fn load_all(&self) -> Result<Vec<Task>, StoreError>;

    /// Delete terminal records older than `retention` at `now`.
    ///
    /// Returns the number of records removed.
    async fn purge_expired(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}

/// Returns true if a terminal record has outlived `retention`.
pub(crate) fn is_expired(task: &Task, retention: Duration, now: DateTime<Utc>) -> bool {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    match task.terminal_at {
        Some(terminal_at) if task.is_terminal() => now - terminal_at > retention,
        _ => false,
    }
}

/// Opens the store selected by configuration.
///
/// Returns `Ok(None)` for the `none` backend.
pub async fn open_store(
    config: &PersistenceConfig,
) -> Result<Option<Arc<dyn DurableStore>>, StoreError> {
    match config.backend {
        PersistenceBackend::None => Ok(None),
        PersistenceBackend::Memory => Ok(Some(Arc::new(MemoryStore::new()))),
        PersistenceBackend::File => {
            let path = config.path.clone().ok_or_else(|| StoreError::Misconfigured {
                reason: "file backend requires a path".to_string(),
            })?;
            Ok(Some(Arc::new(FileStore::open(path).await?)))
        }
    }
}

// ============================================================================
// Write-Behind Writer
// ============================================================================

enum StoreCommand {
    Put(Box<Task>),
    Delete(TaskId),
    Flush(oneshot::Sender<()>),
}

/// Ordered write-behind queue in front of a durable store.
///
/// Sending never blocks, so the registry can forward a record while it
/// still holds the per-task lock. One writer task drains the queue in
/// order; failures are logged and never reach task state.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl StoreWriter {
    /// Spawns the writer task for `store`.
    ///
    /// The task exits once every `StoreWriter` clone has been dropped and
    /// the queue is drained.
    pub fn spawn(store: Arc<dyn DurableStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoreCommand>();

        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    StoreCommand::Put(task) => {
                        if let Err(e) = store.put(&task).await {
                            warn!(task_id = %task.id, error = %e, "Failed to persist task record");
                        }
                    }
                    StoreCommand::Delete(id) => {
                        if let Err(e) = store.delete(&id).await {
                            warn!(task_id = %id, error = %e, "Failed to delete task record");
                        }
                    }
                    StoreCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Store writer stopped");
        });

        (Self { tx }, handle)
    }

    /// Queues a record write.
    pub fn put(&self, task: &Task) {
        if self.tx.send(StoreCommand::Put(Box::new(task.clone()))).is_err() {
            warn!(task_id = %task.id, "Store writer is gone, record not persisted");
        }
    }

    /// Queues a record deletion.
    pub fn delete(&self, id: &TaskId) {
        if self.tx.send(StoreCommand::Delete(id.clone())).is_err() {
            warn!(task_id = %id, "Store writer is gone, record not deleted");
        }
    }

    /// Waits until every command queued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(StoreCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}
