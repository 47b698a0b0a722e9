//! Checkpoint storage abstraction and implementations.

mod fs;

pub use fs::FsCheckpointStorage;

use anyhow::Result;

use crate::types::{ProgressMarker, StateHandle};

/// Abstraction for checkpoint storage locations.
///
/// Implementations handle the actual persistence of checkpoint data,
/// whether to local filesystem, distributed storage, or cloud storage.
#[async_trait::async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Write a task's state to storage.
    async fn write(&self, checkpoint_id: u64, task: &str, data: &[u8]) -> Result<StateHandle>;

    /// Read state from storage.
    async fn read(&self, handle: &StateHandle) -> Result<Vec<u8>>;

    /// Persist the progress marker, making the checkpoint complete.
    async fn write_marker(&self, marker: &ProgressMarker) -> Result<()>;

    /// The marker of one checkpoint; `None` while it is incomplete.
    async fn read_marker(&self, checkpoint_id: u64) -> Result<Option<ProgressMarker>>;

    /// Most recent complete checkpoint, if any.
    async fn latest_marker(&self) -> Result<Option<ProgressMarker>>;

    /// Delete a checkpoint.
    async fn delete(&self, checkpoint_id: u64) -> Result<()>;

    /// List all checkpoints, complete or not, in ascending order.
    async fn list_checkpoints(&self) -> Result<Vec<u64>>;
}
