//! Checkpointing for the pipeline, following Chandy-Lamport style snapshots.
//!
//! - Periodic checkpoint triggering at the sources
//! - Barrier propagation through the operator graph
//! - At-least-once barrier tracking at multi-input tasks
//! - State snapshots and a durable progress marker per completed checkpoint
//!
//! A restart reads [`FsCheckpointStorage::latest_marker`] and resumes every
//! source from the recorded offsets. Output produced after the last marker
//! may be produced again.

mod barrier;
mod config;
mod coordinator;
mod storage;
mod types;

pub use barrier::{BarrierResult, BarrierTracker};
pub use config::CheckpointConfig;
pub use coordinator::CheckpointCoordinator;
pub use storage::{CheckpointStorage, FsCheckpointStorage};
pub use types::{
    AckPayload, CheckpointAck, CheckpointStats, PartitionOffsets, PendingCheckpoint,
    ProgressMarker, SourceControl, StateHandle,
};
