//! Continuous keyed equi-join of two unbounded streams.
//!
//! Both inputs are hash-partitioned on the join key, so every key is owned
//! by exactly one join task. Within a task, each arrival is matched against
//! everything buffered on the other side for the same key, then buffered
//! itself. With no retention configured, state grows for the life of the
//! process.

mod state;

pub use state::JoinState;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tandem_checkpoint::{AckPayload, CheckpointAck, CheckpointStorage, StateHandle};
use tandem_core::{Timestamp, Timestamped};
use tandem_runtime::{
    spawn_co_operator, spawn_sink, spawn_union, stream_channel, CoOperator, Emitter,
    PipelineMetrics, Receiver, Sender,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::partition::{KeyPartitioner, KeyRouter};

pub type KeySelector<T, K> = Arc<dyn Fn(&T) -> Option<K> + Send + Sync>;
pub type JoinFn<L, R, O> = Arc<dyn Fn(&L, &R) -> O + Send + Sync>;

/// Join settings.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    /// Number of join tasks the key space is split across.
    pub parallelism: usize,
    /// How long an entry is kept after its arrival, measured against the
    /// watermark. `None` keeps state forever.
    ///
    /// The watermark is the minimum over both inputs, so nothing is evicted
    /// until each input has emitted one; sources that go quiet must advance
    /// theirs (see `KafkaSource::with_idle_timeout`).
    pub retention: Option<Duration>,
    /// Capacity of each partition's input channels.
    pub buffer_size: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            retention: None,
            buffer_size: 1024,
        }
    }
}

/// Hooks that let join tasks take part in checkpoints.
#[derive(Clone)]
pub struct JoinCheckpointing {
    pub storage: Arc<dyn CheckpointStorage>,
    pub ack_tx: mpsc::Sender<CheckpointAck>,
    /// Snapshots to restore from; every task reads all of them and keeps
    /// the keys it owns, so parallelism may change between runs.
    pub restore_from: Vec<StateHandle>,
}

/// Task name for partition `index`, used as the checkpoint task id.
pub fn join_task_name(index: usize) -> String {
    format!("join-{index}")
}

/// Definition of a keyed join; builds the per-partition operators.
pub struct KeyedJoin<L, R, K, O> {
    left_key: KeySelector<L, K>,
    right_key: KeySelector<R, K>,
    join_fn: JoinFn<L, R, O>,
    config: JoinConfig,
    checkpointing: Option<JoinCheckpointing>,
    metrics: Arc<PipelineMetrics>,
}

impl<L, R, K, O> KeyedJoin<L, R, K, O>
where
    L: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    R: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    K: Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(
        left_key: impl Fn(&L) -> Option<K> + Send + Sync + 'static,
        right_key: impl Fn(&R) -> Option<K> + Send + Sync + 'static,
        join_fn: impl Fn(&L, &R) -> O + Send + Sync + 'static,
    ) -> Self {
        Self {
            left_key: Arc::new(left_key),
            right_key: Arc::new(right_key),
            join_fn: Arc::new(join_fn),
            config: JoinConfig::default(),
            checkpointing: None,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn with_config(mut self, config: JoinConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_checkpointing(mut self, checkpointing: JoinCheckpointing) -> Self {
        self.checkpointing = Some(checkpointing);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.config.parallelism.max(1)
    }

    /// The operator for one partition.
    pub fn operator(&self, partition: usize) -> KeyedJoinOperator<L, R, K, O> {
        KeyedJoinOperator {
            task_name: join_task_name(partition),
            partition,
            partitioner: KeyPartitioner::new(self.parallelism()),
            left_key: self.left_key.clone(),
            right_key: self.right_key.clone(),
            join_fn: self.join_fn.clone(),
            retention: self.config.retention,
            checkpointing: self.checkpointing.clone(),
            metrics: self.metrics.clone(),
            state: JoinState::new(),
        }
    }

    /// Spawn the routers, one join task per partition, and the union that
    /// merges the partitions back into `out`.
    ///
    /// Downstream sees a single stream: each barrier once all partitions
    /// have snapshotted, and one End.
    pub fn spawn(
        self,
        left: Receiver<Timestamped<L>>,
        right: Receiver<Timestamped<R>>,
        out: Sender<O>,
    ) -> Vec<JoinHandle<Result<()>>> {
        let n = self.parallelism();
        let mut handles = Vec::with_capacity(n + 3);
        let mut left_txs = Vec::with_capacity(n);
        let mut right_txs = Vec::with_capacity(n);
        let mut partition_outputs = Vec::with_capacity(n);

        for partition in 0..n {
            let (ltx, lrx) = stream_channel(self.config.buffer_size);
            let (rtx, rrx) = stream_channel(self.config.buffer_size);
            let (otx, orx) = stream_channel(self.config.buffer_size);
            left_txs.push(ltx);
            right_txs.push(rtx);
            partition_outputs.push(orx);
            handles.push(spawn_co_operator(
                "keyed-join",
                self.operator(partition),
                lrx,
                rrx,
                otx,
            ));
        }
        handles.push(spawn_union("join-union", partition_outputs, out));

        let left_key = self.left_key.clone();
        let left_selector: KeySelector<Timestamped<L>, K> =
            Arc::new(move |e: &Timestamped<L>| left_key(&e.value));
        let right_key = self.right_key.clone();
        let right_selector: KeySelector<Timestamped<R>, K> =
            Arc::new(move |e: &Timestamped<R>| right_key(&e.value));

        handles.push(spawn_sink("join-route-left", KeyRouter::new(left_selector, left_txs), left));
        handles.push(spawn_sink("join-route-right", KeyRouter::new(right_selector, right_txs), right));

        info!(parallelism = n, retention = ?self.config.retention, "Keyed join started");
        handles
    }
}

/// One partition of a keyed join.
pub struct KeyedJoinOperator<L, R, K, O> {
    task_name: String,
    partition: usize,
    partitioner: KeyPartitioner,
    left_key: KeySelector<L, K>,
    right_key: KeySelector<R, K>,
    join_fn: JoinFn<L, R, O>,
    retention: Option<Duration>,
    checkpointing: Option<JoinCheckpointing>,
    metrics: Arc<PipelineMetrics>,
    state: JoinState<K, L, R>,
}

impl<L, R, K, O> KeyedJoinOperator<L, R, K, O>
where
    L: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    R: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    K: Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn state(&self) -> &JoinState<K, L, R> {
        &self.state
    }

    async fn emit_all(&self, outputs: Vec<O>, out: &mut Emitter<O>) -> Result<()> {
        PipelineMetrics::add(&self.metrics.joined, outputs.len() as u64);
        for o in outputs {
            out.data(o).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<L, R, K, O> CoOperator for KeyedJoinOperator<L, R, K, O>
where
    L: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    R: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    K: Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Send + 'static,
{
    type In1 = Timestamped<L>;
    type In2 = Timestamped<R>;
    type Out = O;

    async fn open(&mut self) -> Result<()> {
        let Some(checkpointing) = &self.checkpointing else {
            return Ok(());
        };

        for handle in &checkpointing.restore_from {
            let bytes = checkpointing
                .storage
                .read(handle)
                .await
                .with_context(|| format!("Failed to restore join state from {}", handle.path))?;
            let mut restored = JoinState::<K, L, R>::restore(&bytes)?;
            let (partitioner, partition) = (self.partitioner, self.partition);
            restored.retain_keys(|k| partitioner.owns(partition, k));
            self.state.merge(restored);
        }

        if !checkpointing.restore_from.is_empty() {
            let (left, right) = self.state.len();
            info!(task = %self.task_name, keys = self.state.key_count(), left, right, "Join state restored");
        }
        Ok(())
    }

    async fn on_left(&mut self, item: Timestamped<L>, out: &mut Emitter<O>) -> Result<()> {
        let Some(key) = (self.left_key)(&item.value) else {
            return Ok(());
        };
        let matches = self.state.insert_left(key, item.clone());
        let outputs = matches.iter().map(|r| (self.join_fn)(&item.value, r)).collect();
        self.emit_all(outputs, out).await
    }

    async fn on_right(&mut self, item: Timestamped<R>, out: &mut Emitter<O>) -> Result<()> {
        let Some(key) = (self.right_key)(&item.value) else {
            return Ok(());
        };
        let matches = self.state.insert_right(key, item.clone());
        let outputs = matches.iter().map(|l| (self.join_fn)(l, &item.value)).collect();
        self.emit_all(outputs, out).await
    }

    async fn on_watermark(&mut self, wm: Timestamp, _out: &mut Emitter<O>) -> Result<()> {
        if let Some(retention) = self.retention {
            let cutoff = wm.saturating_sub(retention.as_millis() as Timestamp);
            let evicted = self.state.evict_before(cutoff);
            if evicted > 0 {
                PipelineMetrics::add(&self.metrics.evicted, evicted as u64);
                debug!(task = %self.task_name, evicted, cutoff, "Evicted expired join state");
            }
        }
        Ok(())
    }

    async fn on_barrier(&mut self, checkpoint_id: u64) -> Result<()> {
        let Some(checkpointing) = &self.checkpointing else {
            return Ok(());
        };

        let bytes = self.state.snapshot()?;
        let handle = checkpointing
            .storage
            .write(checkpoint_id, &self.task_name, &bytes)
            .await?;
        debug!(task = %self.task_name, checkpoint_id, size = handle.size, "Join state snapshotted");

        checkpointing
            .ack_tx
            .send(CheckpointAck::new(
                self.task_name.clone(),
                checkpoint_id,
                AckPayload::State(handle),
            ))
            .await
            .map_err(|_| anyhow::anyhow!("checkpoint coordinator is gone"))
    }
}
