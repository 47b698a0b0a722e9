//! Checkpoint coordinator implementation.

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CheckpointConfig;
use crate::storage::CheckpointStorage;
use crate::types::{CheckpointAck, CheckpointStats, PendingCheckpoint, ProgressMarker, SourceControl};

/// Coordinates checkpoints across all tasks of a pipeline.
///
/// The coordinator is responsible for:
/// - Triggering periodic checkpoints at the sources
/// - Collecting acknowledgments from sources, stateful tasks and sinks
/// - Publishing the progress marker once every task has acknowledged
/// - Issuing the final checkpoint when the pipeline drains
pub struct CheckpointCoordinator {
    config: CheckpointConfig,
    storage: Arc<dyn CheckpointStorage>,

    /// Checkpoints in flight
    pending: RwLock<BTreeMap<u64, PendingCheckpoint>>,

    /// All tasks that need to acknowledge checkpoints
    tasks: RwLock<HashSet<String>>,

    /// Channel to receive checkpoint acknowledgments
    ack_rx: Mutex<Option<mpsc::Receiver<CheckpointAck>>>,
    ack_tx: mpsc::Sender<CheckpointAck>,

    /// Channel to trigger checkpoints at the sources
    trigger_tx: broadcast::Sender<SourceControl>,

    next_checkpoint_id: Mutex<u64>,

    stats: RwLock<CheckpointStats>,
}

impl CheckpointCoordinator {
    /// Create a new checkpoint coordinator.
    ///
    /// Checkpoint ids continue after `resumed_from` so a restart never
    /// reuses a directory.
    pub fn new(
        config: CheckpointConfig,
        storage: Arc<dyn CheckpointStorage>,
        resumed_from: Option<&ProgressMarker>,
    ) -> Self {
        let (ack_tx, ack_rx) = mpsc::channel(1024);
        let (trigger_tx, _) = broadcast::channel(16);
        let first_id = resumed_from.map(|m| m.checkpoint_id + 1).unwrap_or(1);

        Self {
            config,
            storage,
            pending: RwLock::new(BTreeMap::new()),
            tasks: RwLock::new(HashSet::new()),
            ack_rx: Mutex::new(Some(ack_rx)),
            ack_tx,
            trigger_tx,
            next_checkpoint_id: Mutex::new(first_id),
            stats: RwLock::new(CheckpointStats::default()),
        }
    }

    /// Register a task that participates in checkpointing.
    pub fn register_task(&self, task: impl Into<String>) {
        self.tasks.write().insert(task.into());
    }

    /// Get a sender for checkpoint acknowledgments.
    pub fn ack_sender(&self) -> mpsc::Sender<CheckpointAck> {
        self.ack_tx.clone()
    }

    /// Subscribe to checkpoint triggers (one subscription per source).
    pub fn subscribe_triggers(&self) -> broadcast::Receiver<SourceControl> {
        self.trigger_tx.subscribe()
    }

    /// Storage used for markers and snapshots.
    pub fn storage(&self) -> Arc<dyn CheckpointStorage> {
        self.storage.clone()
    }

    /// Trigger a new checkpoint.
    ///
    /// A periodic checkpoint is skipped while another is in flight; a drain
    /// checkpoint is always issued.
    pub fn trigger_checkpoint(&self, drain: bool) -> Result<u64> {
        if !drain && !self.pending.read().is_empty() {
            anyhow::bail!("Another checkpoint is already in progress");
        }

        let checkpoint_id = {
            let mut id = self.next_checkpoint_id.lock();
            let current = *id;
            *id += 1;
            current
        };

        self.pending
            .write()
            .insert(checkpoint_id, PendingCheckpoint::new(checkpoint_id));

        let control = if drain {
            SourceControl::Drain(checkpoint_id)
        } else {
            SourceControl::Checkpoint(checkpoint_id)
        };
        if self.trigger_tx.send(control).is_err() {
            debug!(checkpoint_id, "No source is listening for checkpoint triggers");
        }

        info!(checkpoint_id, drain, "Triggered checkpoint");
        self.stats.write().total_checkpoints += 1;

        Ok(checkpoint_id)
    }

    /// Process a checkpoint acknowledgment.
    ///
    /// Returns the progress marker when this ack completed a checkpoint.
    pub async fn process_ack(&self, ack: CheckpointAck) -> Result<Option<ProgressMarker>> {
        let completed = {
            let mut pending = self.pending.write();
            let checkpoint_id = ack.checkpoint_id;

            let Some(checkpoint) = pending.get_mut(&checkpoint_id) else {
                debug!(checkpoint_id, task = %ack.task, "Received ack for unknown checkpoint");
                return Ok(None);
            };
            checkpoint.record(ack);

            let tasks = self.tasks.read();
            if !tasks.iter().all(|t| checkpoint.acknowledged_tasks.contains(t)) {
                return Ok(None);
            }

            let done = pending.remove(&checkpoint_id);
            // Anything older can no longer complete.
            let superseded: Vec<u64> = pending.range(..checkpoint_id).map(|(id, _)| *id).collect();
            for id in superseded {
                pending.remove(&id);
                warn!(checkpoint_id = id, "Checkpoint superseded before completing");
                self.stats.write().failed_checkpoints += 1;
            }
            done
        };

        let Some(checkpoint) = completed else {
            return Ok(None);
        };

        let duration = checkpoint.start_time.elapsed();
        let marker = checkpoint.marker;
        self.storage.write_marker(&marker).await?;

        {
            let mut stats = self.stats.write();
            stats.completed_checkpoints += 1;
            stats.last_checkpoint_id = Some(marker.checkpoint_id);
            stats.last_checkpoint_duration = Some(duration);
        }

        self.prune(marker.checkpoint_id).await;

        info!(
            checkpoint_id = marker.checkpoint_id,
            duration_ms = duration.as_millis() as u64,
            "Checkpoint completed"
        );
        Ok(Some(marker))
    }

    /// Keep only the newest `num_retained` completed checkpoints at or below
    /// `latest`, and remove abandoned ones below it.
    ///
    /// Nothing older than `latest` is still pending, so a directory below it
    /// without a marker can never complete.
    async fn prune(&self, latest: u64) {
        let ids = match self.storage.list_checkpoints().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list checkpoints for cleanup");
                return;
            }
        };

        let mut completed = Vec::new();
        for id in ids.into_iter().filter(|id| *id <= latest) {
            match self.storage.read_marker(id).await {
                Ok(Some(_)) => completed.push(id),
                Ok(None) => {
                    debug!(checkpoint_id = id, "Removing abandoned checkpoint");
                    if let Err(e) = self.storage.delete(id).await {
                        warn!(checkpoint_id = id, error = %e, "Failed to delete abandoned checkpoint");
                    }
                }
                Err(e) => warn!(checkpoint_id = id, error = %e, "Keeping unreadable checkpoint"),
            }
        }

        let excess = completed.len().saturating_sub(self.config.num_retained);
        for id in &completed[..excess] {
            if let Err(e) = self.storage.delete(*id).await {
                warn!(checkpoint_id = id, error = %e, "Failed to delete old checkpoint");
            }
        }
    }

    /// Abandon checkpoints that exceeded the timeout.
    pub fn check_timeout(&self) -> Vec<u64> {
        let mut pending = self.pending.write();
        let expired: Vec<u64> = pending
            .iter()
            .filter(|(_, p)| p.start_time.elapsed() > self.config.timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            pending.remove(id);
            warn!(checkpoint_id = id, "Checkpoint timed out");
            self.stats.write().failed_checkpoints += 1;
        }
        expired
    }

    /// Get checkpoint statistics.
    pub fn stats(&self) -> CheckpointStats {
        self.stats.read().clone()
    }

    /// Run the checkpoint coordinator loop until `cancel` fires, then drain.
    ///
    /// Draining issues a final checkpoint that tells every source to end its
    /// stream, and waits (bounded by the checkpoint timeout) for it to
    /// complete. `stopped` fires once every pipeline task has exited; no ack
    /// can arrive after that, so the acks already queued are processed and
    /// draining ends without waiting for the timeout. Returns the last marker
    /// this run published.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        stopped: CancellationToken,
        on_complete: impl Fn(&ProgressMarker) + Send,
    ) -> Result<Option<ProgressMarker>> {
        let mut ack_rx = self
            .ack_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("Coordinator already running"))?;

        let mut interval = tokio::time::interval(self.config.interval);
        // The first tick fires immediately; nothing has been read yet.
        interval.tick().await;

        let mut last = None;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_timeout();
                    if let Err(e) = self.trigger_checkpoint(false) {
                        debug!(error = %e, "Skipped checkpoint trigger");
                    }
                }

                Some(ack) = ack_rx.recv() => {
                    match self.process_ack(ack).await {
                        Ok(Some(marker)) => {
                            on_complete(&marker);
                            last = Some(marker);
                        }
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "Failed to complete checkpoint"),
                    }
                }

                _ = cancel.cancelled() => break,
                _ = stopped.cancelled() => break,
            }
        }

        let final_id = self.trigger_checkpoint(true)?;
        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                Some(ack) = ack_rx.recv() => {
                    match self.process_ack(ack).await {
                        Ok(Some(marker)) => {
                            on_complete(&marker);
                            let done = marker.checkpoint_id >= final_id;
                            last = Some(marker);
                            if done {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Failed to complete final checkpoint");
                            break;
                        }
                    }
                }

                _ = stopped.cancelled() => {
                    while let Ok(ack) = ack_rx.try_recv() {
                        match self.process_ack(ack).await {
                            Ok(Some(marker)) => {
                                on_complete(&marker);
                                last = Some(marker);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                error!(error = %e, "Failed to complete final checkpoint");
                                break;
                            }
                        }
                    }
                    if last.as_ref().map_or(true, |m| m.checkpoint_id < final_id) {
                        warn!(checkpoint_id = final_id, "Pipeline stopped before the final checkpoint completed");
                    }
                    break;
                }

                _ = &mut deadline => {
                    warn!(checkpoint_id = final_id, "Final checkpoint did not complete before timeout");
                    break;
                }
            }
        }

        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsCheckpointStorage;
    use crate::types::{AckPayload, StateHandle};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn coordinator(dir: &std::path::Path, num_retained: usize) -> CheckpointCoordinator {
        coordinator_with(dir, CheckpointConfig::new(dir).with_num_retained(num_retained))
    }

    fn coordinator_with(dir: &std::path::Path, config: CheckpointConfig) -> CheckpointCoordinator {
        let storage = Arc::new(FsCheckpointStorage::new(dir).unwrap());
        let coordinator = CheckpointCoordinator::new(config, storage, None);
        coordinator.register_task("source-a");
        coordinator.register_task("join-0");
        coordinator.register_task("sink");
        coordinator
    }

    fn acks(id: u64) -> Vec<CheckpointAck> {
        vec![
            CheckpointAck::new(
                "source-a",
                id,
                AckPayload::Offsets {
                    topic: "a".into(),
                    offsets: BTreeMap::from([(0, id as i64 * 10)]),
                },
            ),
            CheckpointAck::new(
                "join-0",
                id,
                AckPayload::State(StateHandle { path: "p".into(), size: 1 }),
            ),
            CheckpointAck::new("sink", id, AckPayload::Flushed),
        ]
    }

    #[tokio::test]
    async fn test_checkpoint_completes_after_all_tasks_ack() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 3);
        let mut triggers = coordinator.subscribe_triggers();

        let id = coordinator.trigger_checkpoint(false).unwrap();
        assert_eq!(triggers.recv().await.unwrap(), SourceControl::Checkpoint(id));
        assert!(coordinator.trigger_checkpoint(false).is_err());

        let mut acks = acks(id);
        let last = acks.pop().unwrap();
        for ack in acks {
            assert!(coordinator.process_ack(ack).await.unwrap().is_none());
        }
        let marker = coordinator.process_ack(last).await.unwrap().unwrap();

        assert_eq!(marker.checkpoint_id, id);
        assert_eq!(marker.offsets_for("a").get(&0), Some(&10));
        assert!(marker.state.contains_key("join-0"));

        let stored = coordinator.storage().latest_marker().await.unwrap().unwrap();
        assert_eq!(stored, marker);
        assert_eq!(coordinator.stats().completed_checkpoints, 1);
    }

    #[tokio::test]
    async fn test_old_checkpoints_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 2);

        for _ in 0..4 {
            let id = coordinator.trigger_checkpoint(false).unwrap();
            for ack in acks(id) {
                coordinator.process_ack(ack).await.unwrap();
            }
        }

        let ids = coordinator.storage().list_checkpoints().await.unwrap();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_abandoned_checkpoints_do_not_count_toward_retention() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 3);
        let storage = coordinator.storage();

        let first = coordinator.trigger_checkpoint(false).unwrap();
        for ack in acks(first) {
            coordinator.process_ack(ack).await.unwrap();
        }

        // The join snapshots checkpoint 2 but the sink never acknowledges it.
        let abandoned = coordinator.trigger_checkpoint(false).unwrap();
        storage.write(abandoned, "join-0", b"state").await.unwrap();

        let drain = coordinator.trigger_checkpoint(true).unwrap();
        for ack in acks(drain) {
            coordinator.process_ack(ack).await.unwrap();
        }
        assert_eq!(storage.list_checkpoints().await.unwrap(), vec![first, drain]);

        let next = coordinator.trigger_checkpoint(false).unwrap();
        for ack in acks(next) {
            coordinator.process_ack(ack).await.unwrap();
        }
        assert_eq!(storage.list_checkpoints().await.unwrap(), vec![first, drain, next]);
    }

    #[tokio::test]
    async fn test_timed_out_checkpoint_is_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).with_timeout(Duration::from_millis(1));
        let coordinator = coordinator_with(dir.path(), config);

        let id = coordinator.trigger_checkpoint(false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(coordinator.check_timeout(), vec![id]);
        assert_eq!(coordinator.stats().failed_checkpoints, 1);

        for ack in acks(id) {
            assert!(coordinator.process_ack(ack).await.unwrap().is_none());
        }
        assert!(coordinator.storage().latest_marker().await.unwrap().is_none());

        // Nothing is in flight any more, so periodic triggers resume.
        assert_eq!(coordinator.trigger_checkpoint(false).unwrap(), id + 1);
    }

    #[tokio::test]
    async fn test_completed_checkpoint_supersedes_older_pending_one() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 3);

        let older = coordinator.trigger_checkpoint(false).unwrap();
        let newer = coordinator.trigger_checkpoint(true).unwrap();
        for ack in acks(newer) {
            coordinator.process_ack(ack).await.unwrap();
        }

        let stats = coordinator.stats();
        assert_eq!(stats.completed_checkpoints, 1);
        assert_eq!(stats.failed_checkpoints, 1);
        assert_eq!(stats.last_checkpoint_id, Some(newer));

        for ack in acks(older) {
            assert!(coordinator.process_ack(ack).await.unwrap().is_none());
        }
        let latest = coordinator.storage().latest_marker().await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, newer);
    }

    fn spawn_run(
        coordinator: &Arc<CheckpointCoordinator>,
        cancel: &CancellationToken,
        stopped: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<Option<ProgressMarker>>> {
        let coordinator = coordinator.clone();
        let (cancel, stopped) = (cancel.clone(), stopped.clone());
        tokio::spawn(async move { coordinator.run(cancel, stopped, |_| {}).await })
    }

    #[tokio::test]
    async fn test_drain_ends_when_pipeline_stops_without_final_ack() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).with_timeout(Duration::from_secs(30));
        let coordinator = Arc::new(coordinator_with(dir.path(), config));
        let mut triggers = coordinator.subscribe_triggers();
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        let run = spawn_run(&coordinator, &cancel, &stopped);

        cancel.cancel();
        let SourceControl::Drain(id) = triggers.recv().await.unwrap() else {
            panic!("expected a drain trigger");
        };

        // The sink failed, so it never acknowledges.
        let ack_tx = coordinator.ack_sender();
        for ack in acks(id).into_iter().filter(|ack| ack.task != "sink") {
            ack_tx.send(ack).await.unwrap();
        }
        let started = Instant::now();
        stopped.cancel();

        let last = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("drain waited for the checkpoint timeout")
            .unwrap()
            .unwrap();
        assert!(last.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_drain_processes_queued_acks_when_pipeline_stops() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).with_timeout(Duration::from_secs(30));
        let coordinator = Arc::new(coordinator_with(dir.path(), config));
        let mut triggers = coordinator.subscribe_triggers();
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        let run = spawn_run(&coordinator, &cancel, &stopped);

        cancel.cancel();
        let SourceControl::Drain(id) = triggers.recv().await.unwrap() else {
            panic!("expected a drain trigger");
        };

        let ack_tx = coordinator.ack_sender();
        for ack in acks(id) {
            ack_tx.send(ack).await.unwrap();
        }
        stopped.cancel();

        let last = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(last.map(|m| m.checkpoint_id), Some(id));
    }

    #[tokio::test]
    async fn test_resume_continues_checkpoint_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsCheckpointStorage::new(dir.path()).unwrap());
        let previous = ProgressMarker {
            checkpoint_id: 41,
            ..Default::default()
        };
        let coordinator =
            CheckpointCoordinator::new(CheckpointConfig::new(dir.path()), storage, Some(&previous));
        assert_eq!(coordinator.trigger_checkpoint(true).unwrap(), 42);
    }
}
