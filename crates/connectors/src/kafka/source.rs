//! Kafka source connector.

use crate::kafka::config::KafkaConfig;
use crate::progress::SourceProgress;
use anyhow::{Context, Result};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tandem_checkpoint::{AckPayload, CheckpointAck, PartitionOffsets, SourceControl};
use tandem_core::{now_millis, RawRecord};
use tandem_runtime::Emitter;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Reads every partition of one topic and emits [`RawRecord`]s.
///
/// Partitions are assigned directly instead of through a consumer group
/// subscription, so the read position is exactly what the last progress
/// marker recorded.
pub struct KafkaSource {
    config: KafkaConfig,
    topic: String,
    start_offsets: PartitionOffsets,
    allowed_lateness_ms: u64,
    idle_timeout: Option<Duration>,
    consumer: Option<StreamConsumer>,
}

impl KafkaSource {
    pub fn new(config: KafkaConfig, topic: impl Into<String>) -> Self {
        Self {
            config,
            topic: topic.into(),
            start_offsets: PartitionOffsets::new(),
            allowed_lateness_ms: 0,
            idle_timeout: None,
            consumer: None,
        }
    }

    /// Resume from checkpointed offsets; partitions not listed start at the
    /// earliest offset.
    pub fn with_start_offsets(mut self, offsets: PartitionOffsets) -> Self {
        self.start_offsets = offsets;
        self
    }

    /// Hold the watermark back by this much behind the slowest partition.
    pub fn with_allowed_lateness(mut self, lateness_ms: u64) -> Self {
        self.allowed_lateness_ms = lateness_ms;
        self
    }

    /// After this long without a record, advance the watermark from the
    /// wall clock. `None` or zero leaves a quiet topic's watermark where it is.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Name under which this source acknowledges checkpoints.
    pub fn task_name(&self) -> String {
        format!("source-{}", self.topic)
    }

    /// Connect to the brokers and assign all partitions of the topic.
    ///
    /// Fails if the brokers cannot be reached or the topic does not exist.
    pub fn connect(&mut self) -> Result<()> {
        let mut client_config = self.config.client_config();
        client_config
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");
        if let Some(session_timeout) = self.config.session_timeout_ms {
            client_config.set("session.timeout.ms", session_timeout.to_string());
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        let metadata = consumer
            .fetch_metadata(Some(&self.topic), self.config.request_timeout)
            .with_context(|| format!("Failed to fetch metadata for topic {}", self.topic))?;
        let partitions: Vec<i32> = metadata
            .topics()
            .iter()
            .filter(|t| t.name() == self.topic && t.error().is_none())
            .flat_map(|t| t.partitions().iter().map(|p| p.id()))
            .collect();
        if partitions.is_empty() {
            anyhow::bail!("Topic {} has no partitions available", self.topic);
        }

        let mut tpl = TopicPartitionList::new();
        for partition in &partitions {
            let offset = match self.start_offsets.get(partition) {
                Some(next) => Offset::Offset(*next),
                None => Offset::Beginning,
            };
            tpl.add_partition_offset(&self.topic, *partition, offset)?;
        }
        consumer.assign(&tpl).context("Failed to assign partitions")?;

        info!(
            topic = %self.topic,
            partitions = partitions.len(),
            restored = !self.start_offsets.is_empty(),
            "Kafka source connected"
        );

        self.consumer = Some(consumer);
        Ok(())
    }

    /// Run the source until a drain request arrives.
    ///
    /// On every checkpoint trigger a barrier is injected into the stream and
    /// the current read position is acknowledged to the coordinator. A
    /// drain trigger does the same and then ends the stream.
    pub async fn run(
        self,
        mut emitter: Emitter<RawRecord>,
        mut control: broadcast::Receiver<SourceControl>,
        ack_tx: mpsc::Sender<CheckpointAck>,
    ) -> Result<()> {
        let task_name = self.task_name();
        let consumer = self
            .consumer
            .ok_or_else(|| anyhow::anyhow!("Consumer not connected"))?;
        let mut progress = SourceProgress::new(self.start_offsets, self.allowed_lateness_ms);
        let idle_timeout = self.idle_timeout;
        let mut idle_check = tokio::time::interval(idle_timeout.unwrap_or(Duration::from_secs(3600)));
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_record = Instant::now();

        info!(topic = %self.topic, "Kafka source starting message loop");

        loop {
            tokio::select! {
                biased;

                trigger = control.recv() => match trigger {
                    Ok(trigger) => {
                        let checkpoint_id = trigger.checkpoint_id();
                        emitter.barrier(checkpoint_id).await?;
                        let payload = AckPayload::Offsets {
                            topic: self.topic.clone(),
                            offsets: progress.offsets(),
                        };
                        ack_tx
                            .send(CheckpointAck::new(task_name.clone(), checkpoint_id, payload))
                            .await
                            .map_err(|_| anyhow::anyhow!("checkpoint coordinator is gone"))?;
                        debug!(topic = %self.topic, checkpoint_id, "Barrier injected");

                        if let SourceControl::Drain(_) = trigger {
                            info!(topic = %self.topic, checkpoint_id, "Kafka source drained");
                            return emitter.end().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %self.topic, skipped, "Missed checkpoint triggers");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(topic = %self.topic, "Checkpoint coordinator stopped, ending stream");
                        return emitter.end().await;
                    }
                },

                // BorrowedMessage is not Send; convert it before any await
                message = async { consumer.recv().await.map(|m| raw_record(&m)) } => match message {
                    Ok(record) => {
                        last_record = Instant::now();
                        let watermark = progress.record(record.partition, record.offset, record.ingested_at);
                        emitter.data(record).await?;
                        if let Some(wm) = watermark {
                            emitter.watermark(wm).await?;
                        }
                    }
                    Err(e) => {
                        error!(topic = %self.topic, error = %e, "Error receiving Kafka message");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },

                _ = idle_check.tick(), if idle_timeout.is_some() => {
                    if idle_timeout.is_some_and(|timeout| last_record.elapsed() >= timeout) {
                        if let Some(wm) = progress.advance_idle(now_millis()) {
                            debug!(topic = %self.topic, watermark = wm, "Source idle, watermark advanced");
                            emitter.watermark(wm).await?;
                        }
                    }
                }
            }
        }
    }
}

fn raw_record(message: &BorrowedMessage<'_>) -> RawRecord {
    let ts = message
        .timestamp()
        .to_millis()
        .and_then(|t| u64::try_from(t).ok())
        .unwrap_or_else(now_millis);
    let record = RawRecord::new(
        message.topic(),
        message.partition(),
        message.offset(),
        message.payload().unwrap_or_default().to_vec(),
    )
    .with_ingested_at(ts);
    match message.key() {
        Some(key) => record.with_key(key.to_vec()),
        None => record,
    }
}
