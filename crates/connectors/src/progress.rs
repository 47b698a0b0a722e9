//! Read position and event-time progress of a partitioned source.

use std::collections::HashMap;
use tandem_checkpoint::PartitionOffsets;
use tandem_core::Timestamp;

/// Tracks, per partition, the next offset to read and the newest record
/// time seen, and derives the source watermark from them.
///
/// The watermark is the minimum over partitions that have produced data,
/// less the allowed lateness. It never moves backwards.
///
/// Record times are ingestion times, so once the source has caught up the
/// wall clock is a safe lower bound for what it reads next.
#[derive(Debug, Clone, Default)]
pub struct SourceProgress {
    positions: PartitionOffsets,
    partition_times: HashMap<i32, Timestamp>,
    allowed_lateness_ms: u64,
    watermark: Option<Timestamp>,
}

impl SourceProgress {
    /// Start from restored positions (empty on a first run).
    pub fn new(start: PartitionOffsets, allowed_lateness_ms: u64) -> Self {
        Self {
            positions: start,
            allowed_lateness_ms,
            ..Default::default()
        }
    }

    /// Account for a record; returns the new watermark if it advanced.
    pub fn record(&mut self, partition: i32, offset: i64, ts: Timestamp) -> Option<Timestamp> {
        let next = self.positions.entry(partition).or_insert(offset + 1);
        *next = (*next).max(offset + 1);

        let seen = self.partition_times.entry(partition).or_insert(ts);
        *seen = (*seen).max(ts);

        let slowest = self.partition_times.values().copied().min()?;
        self.advance(slowest.saturating_sub(self.allowed_lateness_ms))
    }

    /// Account for a source that has read nothing for a while, as if every
    /// partition had just produced a record at `now`.
    pub fn advance_idle(&mut self, now: Timestamp) -> Option<Timestamp> {
        for seen in self.partition_times.values_mut() {
            *seen = (*seen).max(now);
        }
        self.advance(now.saturating_sub(self.allowed_lateness_ms))
    }

    fn advance(&mut self, candidate: Timestamp) -> Option<Timestamp> {
        if self.watermark.map_or(true, |wm| candidate > wm) {
            self.watermark = Some(candidate);
            return Some(candidate);
        }
        None
    }

    /// Next offset to read, per partition, for the progress marker.
    pub fn offsets(&self) -> PartitionOffsets {
        self.positions.clone()
    }

    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_point_past_last_record() {
        let mut progress = SourceProgress::new(PartitionOffsets::from([(1, 40)]), 0);
        progress.record(0, 7, 100);
        progress.record(0, 8, 101);

        // partition 1 never produced but keeps its restored position
        assert_eq!(progress.offsets(), PartitionOffsets::from([(0, 9), (1, 40)]));
    }

    #[test]
    fn test_watermark_is_partition_minimum_and_monotonic() {
        let mut progress = SourceProgress::new(PartitionOffsets::new(), 10);
        assert_eq!(progress.record(0, 0, 100), Some(90));
        // a slower partition holds the watermark back
        assert_eq!(progress.record(1, 0, 50), None);
        assert_eq!(progress.watermark(), Some(90));
        assert_eq!(progress.record(1, 1, 200), None);
        assert_eq!(progress.record(0, 1, 300), Some(190));
    }

    #[test]
    fn test_idle_source_advances_from_the_wall_clock() {
        // Nothing read yet: a quiet topic still produces a watermark.
        let mut progress = SourceProgress::new(PartitionOffsets::new(), 10);
        assert_eq!(progress.advance_idle(1000), Some(990));
        assert_eq!(progress.record(0, 0, 500), None);
        assert_eq!(progress.record(0, 1, 2000), Some(1990));
    }

    #[test]
    fn test_idle_advance_releases_a_quiet_partition() {
        let mut progress = SourceProgress::new(PartitionOffsets::new(), 10);
        progress.record(0, 0, 100);
        progress.record(1, 0, 100);
        assert_eq!(progress.record(0, 1, 5000), None);

        assert_eq!(progress.advance_idle(6000), Some(5990));
        // partition 1 counts as seen at 6000 until it produces again
        assert_eq!(progress.record(0, 2, 7000), None);
        assert_eq!(progress.record(1, 1, 8000), Some(6990));
    }
}
