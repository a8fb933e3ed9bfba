//! Directory-backed durable store: one JSON file per task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use super::{DurableStore, StoreError, is_expired};
use crate::task::{Task, TaskId};

const RECORD_EXTENSION: &str = "json";

/// Stores each task as `<dir>/<task_id>.json`.
///
/// Writes go to a temp file that is renamed over the record. `rename(2)` is
/// atomic on the same filesystem, so readers never see a half-written record.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) the store directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `id`, or `None` for ids that are not safe
    /// file names. Such ids were never generated here, so they have no record.
    fn record_path(&self, id: &TaskId) -> Option<PathBuf> {
        let s = id.as_str();
        let safe = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        safe.then(|| self.dir.join(format!("{s}.{RECORD_EXTENSION}")))
    }

    async fn read_record(path: &Path) -> Result<Option<Task>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn remove_record(path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Paths of every record file in the directory.
    async fn record_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Write content atomically using temp-file + rename.
///
/// On failure the temp file is cleaned up best-effort.
async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl DurableStore for FileStore {
    async fn put(&self, task: &Task) -> Result<(), StoreError> {
        let path = self
            .record_path(&task.id)
            .ok_or_else(|| StoreError::Misconfigured {
                reason: format!("task id '{}' is not a valid record name", task.id),
            })?;
        let content = serde_json::to_vec_pretty(task)?;
        atomic_write(&path, &content)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        match self.record_path(id) {
            Some(path) => Self::read_record(&path).await,
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        match self.record_path(id) {
            Some(path) => Self::remove_record(&path).await,
            None => Ok(()),
        }
    }

    async fn load_all(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = Vec::new();
        for path in self.record_paths().await? {
            match Self::read_record(&path).await {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                // One bad file must not hide every other record
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable task record"),
            }
        }
        Ok(tasks)
    }

    async fn purge_expired(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut purged = 0;
        for path in self.record_paths().await? {
            if let Ok(Some(task)) = Self::read_record(&path).await
                && is_expired(&task, retention, now)
            {
                Self::remove_record(&path).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{FailureKind, TaskPhase};
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("tasks")).await.unwrap();

        let mut task = Task::new(TaskId::new(), "export", json!({"format": "csv"}));
        task.transition(TaskPhase::Working, None).unwrap();
        task.transition(
            TaskPhase::failed(FailureKind::ExecutionFailure, "disk full"),
            None,
        )
        .unwrap();

        store.put(&task).await.unwrap();
        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);

        // No temp files left behind
        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{}.json", task.id)]);
    }

    #[tokio::test]
    async fn test_load_all_skips_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let task = Task::new(TaskId::new(), "echo", json!({}));
        store.put(&task).await.unwrap();
        std::fs::write(dir.path().join("tk_broken.json"), b"{not json").unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all, vec![task]);
    }

    #[tokio::test]
    async fn test_unsafe_ids_have_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let id = TaskId::from_raw("../../etc/passwd");
        assert!(store.get(&id).await.unwrap().is_none());
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired_removes_old_terminal_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let running = Task::new(TaskId::new(), "echo", json!({}));
        let mut done = Task::new(TaskId::new(), "echo", json!({}));
        done.transition(TaskPhase::Working, None).unwrap();
        done.transition(TaskPhase::Cancelled, None).unwrap();
        store.put(&running).await.unwrap();
        store.put(&done).await.unwrap();

        let later = Utc::now() + chrono::Duration::minutes(5);
        let purged = store
            .purge_expired(Duration::from_secs(60), later)
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(store.get(&done.id).await.unwrap().is_none());
        assert!(store.get(&running.id).await.unwrap().is_some());
    }
}
