//! Snapshot-to-file persistence of exported detector state.
//!
//! Unlike the other back-ends this does not implement the per-record
//! [`Storage`](super::Storage) contract: it serializes one whole
//! [`Snapshot`] document and is driven only by explicit snapshot and
//! restore calls.

use std::path::{Path, PathBuf};

use super::StorageError;
use crate::record::Snapshot;

/// Writes and reads detector snapshots as a single JSON file.
#[derive(Debug, Clone)]
pub struct SnapshotStorage {
    path: PathBuf,
}

impl SnapshotStorage {
    /// Builds a snapshot store rooted at the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path the snapshot is written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes the snapshot to disk, creating parent directories as
    /// needed.
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec(snapshot)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }

    /// Reads a snapshot back from disk.
    pub async fn load_snapshot(&self) -> Result<Snapshot, StorageError> {
        let body = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Whether a snapshot file currently exists.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StoredRecord;

    #[tokio::test(flavor = "current_thread")]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStorage::new(dir.path().join("state/snapshot.json"));
        assert!(!store.exists().await);

        let snapshot = Snapshot {
            records: vec![StoredRecord {
                id: 1,
                title: "t".into(),
                description: "d".into(),
                files: vec!["a.rs".into()],
                text_embedding: vec![0.1, 0.9],
                diff_embedding: vec![1.0, 0.0],
                created_at: 42,
            }],
            bloom: "AAAA".into(),
        };
        store.save_snapshot(&snapshot).await.expect("save");
        assert!(store.exists().await);

        let loaded = store.load_snapshot().await.expect("load");
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].text_embedding, vec![0.1, 0.9]);
        assert_eq!(loaded.bloom, "AAAA");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_snapshot_surfaces_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStorage::new(dir.path().join("absent.json"));
        assert!(matches!(
            store.load_snapshot().await,
            Err(StorageError::Io(_))
        ));
    }
}
