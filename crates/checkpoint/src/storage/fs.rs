//! File-system based checkpoint storage.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::CheckpointStorage;
use crate::types::{ProgressMarker, StateHandle};

const MARKER_FILE: &str = "_marker.json";

/// File-system based checkpoint storage.
///
/// Stores checkpoints in a directory structure:
/// ```text
/// base_path/
///   chk-1/
///     join-0.state
///     join-1.state
///     _marker.json
///   chk-2/
///     ...
/// ```
///
/// A checkpoint directory without `_marker.json` is incomplete and is
/// never used for recovery.
pub struct FsCheckpointStorage {
    base_path: PathBuf,
}

impl FsCheckpointStorage {
    /// Create a new filesystem checkpoint storage.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)
            .with_context(|| format!("Failed to create checkpoint dir {}", base_path.display()))?;
        Ok(Self { base_path })
    }

    /// Get the base path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checkpoint_dir(&self, checkpoint_id: u64) -> PathBuf {
        self.base_path.join(format!("chk-{}", checkpoint_id))
    }
}

#[async_trait::async_trait]
impl CheckpointStorage for FsCheckpointStorage {
    async fn write(&self, checkpoint_id: u64, task: &str, data: &[u8]) -> Result<StateHandle> {
        let checkpoint_dir = self.checkpoint_dir(checkpoint_id);
        tokio::fs::create_dir_all(&checkpoint_dir).await?;

        let file_path = checkpoint_dir.join(format!("{}.state", task));
        tokio::fs::write(&file_path, data)
            .await
            .with_context(|| format!("Failed to write state {}", file_path.display()))?;

        Ok(StateHandle {
            path: file_path.to_string_lossy().to_string(),
            size: data.len() as u64,
        })
    }

    async fn read(&self, handle: &StateHandle) -> Result<Vec<u8>> {
        tokio::fs::read(&handle.path)
            .await
            .context("Failed to read state")
    }

    async fn write_marker(&self, marker: &ProgressMarker) -> Result<()> {
        let checkpoint_dir = self.checkpoint_dir(marker.checkpoint_id);
        tokio::fs::create_dir_all(&checkpoint_dir).await?;

        let data = serde_json::to_vec_pretty(marker)?;
        let tmp = checkpoint_dir.join(format!("{}.tmp", MARKER_FILE));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, checkpoint_dir.join(MARKER_FILE))
            .await
            .context("Failed to publish progress marker")?;

        debug!(checkpoint_id = marker.checkpoint_id, "Progress marker written");
        Ok(())
    }

    async fn read_marker(&self, checkpoint_id: u64) -> Result<Option<ProgressMarker>> {
        let path = self.checkpoint_dir(checkpoint_id).join(MARKER_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let marker = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt progress marker {}", path.display()))?;
                Ok(Some(marker))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read progress marker"),
        }
    }

    async fn latest_marker(&self) -> Result<Option<ProgressMarker>> {
        for checkpoint_id in self.list_checkpoints().await?.into_iter().rev() {
            match self.read_marker(checkpoint_id).await {
                Ok(Some(marker)) => return Ok(Some(marker)),
                Ok(None) => debug!(checkpoint_id, "Skipping incomplete checkpoint"),
                Err(e) => warn!(checkpoint_id, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(None)
    }

    async fn delete(&self, checkpoint_id: u64) -> Result<()> {
        let checkpoint_dir = self.checkpoint_dir(checkpoint_id);
        if checkpoint_dir.exists() {
            tokio::fs::remove_dir_all(&checkpoint_dir).await?;
        }
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<u64>> {
        let mut checkpoints = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(id) = name_str.strip_prefix("chk-") {
                if let Ok(id) = id.parse::<u64>() {
                    checkpoints.push(id);
                }
            }
        }

        checkpoints.sort();
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn marker(checkpoint_id: u64) -> ProgressMarker {
        let mut offsets = BTreeMap::new();
        offsets.insert("stedi-events".to_string(), BTreeMap::from([(0, 42), (1, 7)]));
        ProgressMarker {
            checkpoint_id,
            created_at: 1000,
            offsets,
            state: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCheckpointStorage::new(dir.path()).unwrap();

        let handle = storage.write(1, "join-0", b"state-bytes").await.unwrap();
        assert_eq!(handle.size, 11);
        assert_eq!(storage.read(&handle).await.unwrap(), b"state-bytes");
    }

    #[tokio::test]
    async fn test_latest_marker_skips_incomplete_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCheckpointStorage::new(dir.path()).unwrap();

        assert!(storage.latest_marker().await.unwrap().is_none());

        storage.write_marker(&marker(1)).await.unwrap();
        storage.write_marker(&marker(2)).await.unwrap();
        // Checkpoint 3 has state but never completed.
        storage.write(3, "join-0", b"partial").await.unwrap();

        let latest = storage.latest_marker().await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, 2);
        assert_eq!(latest.offsets_for("stedi-events").get(&0), Some(&42));
        assert!(latest.offsets_for("redis-server").is_empty());
        assert_eq!(storage.list_checkpoints().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCheckpointStorage::new(dir.path()).unwrap();

        storage.write_marker(&marker(5)).await.unwrap();
        storage.delete(5).await.unwrap();
        assert!(storage.list_checkpoints().await.unwrap().is_empty());
        // Deleting twice is fine.
        storage.delete(5).await.unwrap();
    }
}
