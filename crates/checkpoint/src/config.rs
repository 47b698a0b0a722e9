//! Checkpoint configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for checkpoint behavior.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Directory holding progress markers and state snapshots.
    pub dir: PathBuf,
    /// Interval between checkpoints.
    pub interval: Duration,
    /// Timeout for checkpoint completion (also bounds the final drain).
    pub timeout: Duration,
    /// Number of checkpoints to retain.
    pub num_retained: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/stedi-risk-checkpoint"),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            num_retained: 3,
        }
    }
}

impl CheckpointConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_num_retained(mut self, num_retained: usize) -> Self {
        self.num_retained = num_retained.max(1);
        self
    }
}
