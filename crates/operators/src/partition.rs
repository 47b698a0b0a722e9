//! Hash partitioning of a keyed stream across parallel tasks.

use anyhow::Result;
use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tandem_core::StreamMessage;
use tandem_runtime::{Sender, Sink};

/// Maps a key to one of `num_partitions` owners.
///
/// The same key always maps to the same partition within a process, which
/// is what makes per-key state single-owner.
#[derive(Debug, Clone, Copy)]
pub struct KeyPartitioner {
    num_partitions: usize,
}

impl KeyPartitioner {
    pub fn new(num_partitions: usize) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn partition<K: Hash + ?Sized>(&self, key: &K) -> usize {
        if self.num_partitions == 1 {
            return 0;
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.num_partitions
    }

    pub fn owns<K: Hash + ?Sized>(&self, partition: usize, key: &K) -> bool {
        self.partition(key) == partition
    }
}

/// Routes data to the partition owning its key and broadcasts control
/// messages (watermarks, barriers, End) to every partition.
pub struct KeyRouter<T, K> {
    partitioner: KeyPartitioner,
    key_selector: Arc<dyn Fn(&T) -> Option<K> + Send + Sync>,
    outputs: Vec<Sender<T>>,
}

impl<T, K> KeyRouter<T, K>
where
    T: Clone + Send + 'static,
    K: Hash,
{
    /// Records whose selector returns `None` are dropped: they can never
    /// satisfy an equality predicate.
    pub fn new(
        key_selector: Arc<dyn Fn(&T) -> Option<K> + Send + Sync>,
        outputs: Vec<Sender<T>>,
    ) -> Self {
        Self {
            partitioner: KeyPartitioner::new(outputs.len()),
            key_selector,
            outputs,
        }
    }

    async fn send(&self, partition: usize, msg: StreamMessage<T>) -> Result<()> {
        self.outputs[partition]
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("partition {partition} channel closed"))
    }
}

#[async_trait]
impl<T, K> Sink for KeyRouter<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Hash + Send + 'static,
{
    type In = T;

    async fn on_message(&mut self, msg: StreamMessage<T>) -> Result<()> {
        match msg.into_control::<T>() {
            Err(v) => {
                let Some(partition) = (self.key_selector)(&v).map(|k| self.partitioner.partition(&k))
                else {
                    return Ok(());
                };
                self.send(partition, StreamMessage::Data(v)).await
            }
            Ok(control) => {
                for partition in 0..self.outputs.len() {
                    self.send(partition, control.clone()).await?;
                }
                Ok(())
            }
        }
    }
}
