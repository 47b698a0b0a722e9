//! Barrier tracking for checkpoint alignment.

use std::collections::BTreeMap;
use tracing::warn;

/// Tracks checkpoint barriers for a task with multiple inputs.
///
/// At-least-once tracking: inputs are never blocked while a barrier is
/// pending. A barrier is counted per arrival, so inputs merged into one
/// channel can still be tracked as long as each input delivers every
/// barrier exactly once.
pub struct BarrierTracker {
    num_inputs: usize,

    /// checkpoint id -> barriers received so far
    pending: BTreeMap<u64, usize>,

    /// Highest checkpoint id that has aligned.
    last_aligned: Option<u64>,
}

/// Result of processing a barrier.
#[derive(Debug, PartialEq, Eq)]
pub enum BarrierResult {
    /// Barrier received but still waiting for other inputs.
    Pending,
    /// All barriers received, checkpoint can proceed.
    Aligned(u64),
    /// Barrier belongs to a checkpoint that already aligned or was superseded.
    Stale,
}

impl BarrierTracker {
    /// Create a new barrier tracker for `num_inputs` inputs.
    pub fn new(num_inputs: usize) -> Self {
        Self {
            num_inputs: num_inputs.max(1),
            pending: BTreeMap::new(),
            last_aligned: None,
        }
    }

    /// Process a barrier received on any input.
    pub fn process_barrier(&mut self, checkpoint_id: u64) -> BarrierResult {
        if self.last_aligned.is_some_and(|last| checkpoint_id <= last) {
            warn!(checkpoint_id, "Received barrier for an already aligned checkpoint");
            return BarrierResult::Stale;
        }

        let seen = self.pending.entry(checkpoint_id).or_insert(0);
        *seen += 1;

        if *seen < self.num_inputs {
            return BarrierResult::Pending;
        }

        // Older checkpoints can no longer align once a newer one has.
        self.pending = self.pending.split_off(&(checkpoint_id + 1));
        self.last_aligned = Some(checkpoint_id);
        BarrierResult::Aligned(checkpoint_id)
    }

    /// Number of checkpoints with at least one barrier still outstanding.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_tracker_single_input() {
        let mut tracker = BarrierTracker::new(1);
        assert_eq!(tracker.process_barrier(1), BarrierResult::Aligned(1));
    }

    #[test]
    fn test_barrier_tracker_multi_input() {
        let mut tracker = BarrierTracker::new(3);

        assert_eq!(tracker.process_barrier(1), BarrierResult::Pending);
        assert_eq!(tracker.process_barrier(1), BarrierResult::Pending);
        assert_eq!(tracker.process_barrier(1), BarrierResult::Aligned(1));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_newer_alignment_drops_older_pending() {
        let mut tracker = BarrierTracker::new(2);

        assert_eq!(tracker.process_barrier(1), BarrierResult::Pending);
        assert_eq!(tracker.process_barrier(2), BarrierResult::Pending);
        assert_eq!(tracker.process_barrier(2), BarrierResult::Aligned(2));
        assert_eq!(tracker.pending_count(), 0);

        // Late barrier for checkpoint 1 is ignored.
        assert_eq!(tracker.process_barrier(1), BarrierResult::Stale);
    }
}
