//! Common types for checkpoint coordination.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use tandem_core::{now_millis, Timestamp};

/// Next offset to read, per partition.
pub type PartitionOffsets = BTreeMap<i32, i64>;

/// Location of one task's snapshot inside checkpoint storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHandle {
    pub path: String,
    pub size: u64,
}

/// The durable progress marker written when a checkpoint completes.
///
/// Restarting from a marker resumes every source at `offsets` and every
/// stateful task from its entry in `state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub checkpoint_id: u64,
    pub created_at: Timestamp,
    /// topic -> partition -> next offset
    pub offsets: BTreeMap<String, PartitionOffsets>,
    /// task name -> snapshot
    pub state: BTreeMap<String, StateHandle>,
}

impl ProgressMarker {
    /// Offsets recorded for a topic, empty if the topic was never read.
    pub fn offsets_for(&self, topic: &str) -> PartitionOffsets {
        self.offsets.get(topic).cloned().unwrap_or_default()
    }

    /// All state handles whose task name starts with `prefix`.
    pub fn state_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a StateHandle> {
        self.state
            .iter()
            .filter(move |(task, _)| task.starts_with(prefix))
            .map(|(_, handle)| handle)
    }
}

/// Instruction sent from the coordinator to every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceControl {
    /// Inject a barrier and report offsets.
    Checkpoint(u64),
    /// Inject a final barrier, report offsets, then end the stream.
    Drain(u64),
}

impl SourceControl {
    pub fn checkpoint_id(&self) -> u64 {
        match self {
            SourceControl::Checkpoint(id) | SourceControl::Drain(id) => *id,
        }
    }
}

/// What a task contributes to a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckPayload {
    /// A source's read position at the barrier.
    Offsets { topic: String, offsets: PartitionOffsets },
    /// A stateful task's snapshot.
    State(StateHandle),
    /// A sink has flushed everything before the barrier.
    Flushed,
}

/// Acknowledgment from a task that it has completed its checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointAck {
    pub task: String,
    pub checkpoint_id: u64,
    pub payload: AckPayload,
}

impl CheckpointAck {
    pub fn new(task: impl Into<String>, checkpoint_id: u64, payload: AckPayload) -> Self {
        Self {
            task: task.into(),
            checkpoint_id,
            payload,
        }
    }
}

/// A checkpoint that is in progress.
#[derive(Debug)]
pub struct PendingCheckpoint {
    pub start_time: Instant,
    pub acknowledged_tasks: HashSet<String>,
    pub marker: ProgressMarker,
}

impl PendingCheckpoint {
    pub fn new(checkpoint_id: u64) -> Self {
        Self {
            start_time: Instant::now(),
            acknowledged_tasks: HashSet::new(),
            marker: ProgressMarker {
                checkpoint_id,
                created_at: now_millis(),
                ..Default::default()
            },
        }
    }

    pub fn record(&mut self, ack: CheckpointAck) {
        match ack.payload {
            AckPayload::Offsets { topic, offsets } => {
                self.marker.offsets.entry(topic).or_default().extend(offsets);
            }
            AckPayload::State(handle) => {
                self.marker.state.insert(ack.task.clone(), handle);
            }
            AckPayload::Flushed => {}
        }
        self.acknowledged_tasks.insert(ack.task);
    }
}

/// Statistics about checkpointing.
#[derive(Debug, Default, Clone)]
pub struct CheckpointStats {
    pub total_checkpoints: u64,
    pub completed_checkpoints: u64,
    pub failed_checkpoints: u64,
    pub last_checkpoint_id: Option<u64>,
    pub last_checkpoint_duration: Option<Duration>,
}
