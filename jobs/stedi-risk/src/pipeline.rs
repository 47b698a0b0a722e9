//! Wiring of sources, stages, join and sink for each job mode.
//!
//! ```text
//! redis-server  -> ProfileStage -+
//!                                +-> KeyedJoin (email == customer) -> SinkStage -> writers
//! stedi-events  -> RiskStage ----+
//! ```

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::sync::Arc;
use std::time::Duration;
use tandem_checkpoint::{
    CheckpointConfig, CheckpointCoordinator, CheckpointStorage, FsCheckpointStorage,
    PartitionOffsets, ProgressMarker,
};
use tandem_connectors::kafka::{KafkaConfig, KafkaSink, KafkaSource};
use tandem_connectors::{ConsoleSink, RecordWriter};
use tandem_core::{RawRecord, Timestamped};
use tandem_operators::join::join_task_name;
use tandem_operators::{FlatMapOperator, JoinCheckpointing, JoinConfig, KeyedJoin, MapOperator};
use tandem_runtime::{
    spawn_operator, spawn_sink, spawn_source, stream_channel, PipelineMetrics, Receiver,
};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::model::{CustomerRisk, EmailBirthYear, EnrichedRisk, OutputRecord};
use crate::sink::{SinkStage, SINK_TASK};
use crate::stages::{ProfileStage, RiskStage};

pub const DEFAULT_PROFILE_TOPIC: &str = "redis-server";
pub const DEFAULT_RISK_TOPIC: &str = "stedi-events";
pub const DEFAULT_OUTPUT_TOPIC: &str = "stedi-risk";

/// Prefix of the join tasks' entries in the progress marker.
const JOIN_STATE_PREFIX: &str = "join-";

/// Which part of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Risk scores joined with profiles, written to the configured sinks.
    Join,
    /// Risk scores only, as a console table.
    Events,
    /// Projected profiles only, as a console table.
    Customers,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Join => "join",
            Mode::Events => "events",
            Mode::Customers => "customers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    Kafka,
    Console,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: Mode,
    pub kafka: KafkaConfig,
    pub profile_topic: String,
    pub risk_topic: String,
    pub output_topic: String,
    /// Writers for the joined output. The diagnostic modes always print.
    pub sinks: Vec<SinkKind>,
    /// Each mode keeps its own progress markers under `checkpoint.dir`.
    pub checkpoint: CheckpointConfig,
    pub join: JoinConfig,
    /// How far each source's watermark trails its slowest partition.
    pub allowed_lateness: Duration,
    /// How long a source may read nothing before its watermark follows the
    /// wall clock.
    pub source_idle_timeout: Option<Duration>,
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Join,
            kafka: KafkaConfig::default(),
            profile_topic: DEFAULT_PROFILE_TOPIC.to_string(),
            risk_topic: DEFAULT_RISK_TOPIC.to_string(),
            output_topic: DEFAULT_OUTPUT_TOPIC.to_string(),
            sinks: vec![SinkKind::Kafka],
            checkpoint: CheckpointConfig::default(),
            join: JoinConfig::default(),
            allowed_lateness: Duration::ZERO,
            source_idle_timeout: Some(Duration::from_secs(60)),
            channel_capacity: 1024,
        }
    }
}

/// Everything one pipeline run shares: its configuration, counters,
/// checkpoint coordinator, the marker it resumed from, and the token that
/// starts shutdown.
pub struct PipelineContext {
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    coordinator: Arc<CheckpointCoordinator>,
    resumed: Option<ProgressMarker>,
    cancel: CancellationToken,
}

impl PipelineContext {
    /// Open checkpoint storage and load the latest progress marker.
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        let checkpoint = CheckpointConfig {
            dir: config.checkpoint.dir.join(config.mode.as_str()),
            ..config.checkpoint.clone()
        };
        let storage = Arc::new(
            FsCheckpointStorage::new(&checkpoint.dir)
                .with_context(|| format!("Failed to open checkpoint dir {}", checkpoint.dir.display()))?,
        );

        let resumed = storage.latest_marker().await?;
        match &resumed {
            Some(marker) => info!(
                checkpoint_id = marker.checkpoint_id,
                dir = %checkpoint.dir.display(),
                "Resuming from progress marker"
            ),
            None => info!(dir = %checkpoint.dir.display(), "No progress marker, reading from earliest offsets"),
        }

        let coordinator = Arc::new(CheckpointCoordinator::new(checkpoint, storage, resumed.as_ref()));
        Ok(Self {
            config,
            metrics: Arc::new(PipelineMetrics::new()),
            coordinator,
            resumed,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn coordinator(&self) -> Arc<CheckpointCoordinator> {
        self.coordinator.clone()
    }

    pub fn resumed(&self) -> Option<&ProgressMarker> {
        self.resumed.as_ref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Where to resume reading `topic`; empty on a first run.
    pub fn start_offsets(&self, topic: &str) -> PartitionOffsets {
        self.resumed
            .as_ref()
            .map(|m| m.offsets_for(topic))
            .unwrap_or_default()
    }

    fn join_checkpointing(&self) -> JoinCheckpointing {
        JoinCheckpointing {
            storage: self.coordinator.storage(),
            ack_tx: self.coordinator.ack_sender(),
            restore_from: self
                .resumed
                .as_ref()
                .map(|m| m.state_with_prefix(JOIN_STATE_PREFIX).cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Spawn the enrichment pipeline over raw profile-change and risk-score
    /// streams.
    pub fn spawn_join(
        &self,
        profiles: Receiver<RawRecord>,
        risks: Receiver<RawRecord>,
        writers: Vec<Box<dyn RecordWriter<EnrichedRisk>>>,
    ) -> Vec<JoinHandle<Result<()>>> {
        let capacity = self.config.channel_capacity;
        let (profile_tx, profile_rx) = stream_channel(capacity);
        let (risk_tx, risk_rx) = stream_channel(capacity);
        let (joined_tx, joined_rx) = stream_channel(capacity);

        let profile_stage = ProfileStage::new(self.metrics.clone());
        let risk_stage = RiskStage::new(self.metrics.clone());
        let mut handles = vec![
            spawn_operator(
                "profile-stage",
                FlatMapOperator::new(move |raw: RawRecord| profile_stage.process(raw)),
                profiles,
                profile_tx,
            ),
            spawn_operator(
                "risk-stage",
                FlatMapOperator::new(move |raw: RawRecord| risk_stage.process(raw)),
                risks,
                risk_tx,
            ),
        ];

        let join = KeyedJoin::new(
            |risk: &CustomerRisk| risk.customer.clone(),
            |profile: &EmailBirthYear| Some(profile.email.clone()),
            EnrichedRisk::join,
        )
        .with_config(self.config.join.clone())
        .with_metrics(self.metrics.clone())
        .with_checkpointing(self.join_checkpointing());
        for partition in 0..join.parallelism() {
            self.coordinator.register_task(join_task_name(partition));
        }
        handles.extend(join.spawn(risk_rx, profile_rx, joined_tx));

        handles.push(self.spawn_output(writers, joined_rx));
        handles
    }

    /// Spawn the risk-score feed alone, reduced to `(customer, score)`.
    pub fn spawn_events(
        &self,
        risks: Receiver<RawRecord>,
        writers: Vec<Box<dyn RecordWriter<CustomerRisk>>>,
    ) -> Vec<JoinHandle<Result<()>>> {
        let (tx, rx) = stream_channel(self.config.channel_capacity);
        let stage = RiskStage::new(self.metrics.clone());
        vec![
            spawn_operator(
                "risk-stage",
                FlatMapOperator::new(move |raw: RawRecord| stage.process(raw).map(|t| t.value)),
                risks,
                tx,
            ),
            self.spawn_output(writers, rx),
        ]
    }

    /// Spawn the profile-change feed alone, reduced to `(email, birthYear)`.
    pub fn spawn_customers(
        &self,
        profiles: Receiver<RawRecord>,
        writers: Vec<Box<dyn RecordWriter<EmailBirthYear>>>,
    ) -> Vec<JoinHandle<Result<()>>> {
        let capacity = self.config.channel_capacity;
        let (staged_tx, staged_rx) = stream_channel(capacity);
        let (tx, rx) = stream_channel(capacity);
        let stage = ProfileStage::new(self.metrics.clone());
        vec![
            spawn_operator(
                "profile-stage",
                FlatMapOperator::new(move |raw: RawRecord| stage.process(raw)),
                profiles,
                staged_tx,
            ),
            spawn_operator(
                "untimestamp",
                MapOperator::new(|t: Timestamped<EmailBirthYear>| t.value),
                staged_rx,
                tx,
            ),
            self.spawn_output(writers, rx),
        ]
    }

    fn spawn_output<R: OutputRecord>(
        &self,
        writers: Vec<Box<dyn RecordWriter<R>>>,
        rx: Receiver<R>,
    ) -> JoinHandle<Result<()>> {
        self.coordinator.register_task(SINK_TASK);
        let stage = SinkStage::new(writers, self.metrics.clone())
            .with_checkpointing(self.coordinator.ack_sender());
        spawn_sink("sink", stage, rx)
    }

    /// Connect a Kafka source for `topic` at its restored offsets and spawn it.
    fn spawn_kafka_source(&self, topic: &str) -> Result<(Receiver<RawRecord>, JoinHandle<Result<()>>)> {
        let mut source = KafkaSource::new(self.config.kafka.clone(), topic)
            .with_start_offsets(self.start_offsets(topic))
            .with_allowed_lateness(self.config.allowed_lateness.as_millis() as u64)
            .with_idle_timeout(self.config.source_idle_timeout);
        source.connect()?;
        self.coordinator.register_task(source.task_name());

        let (tx, rx) = stream_channel(self.config.channel_capacity);
        let control = self.coordinator.subscribe_triggers();
        let ack_tx = self.coordinator.ack_sender();
        let handle = spawn_source("kafka-source", tx, move |emitter| source.run(emitter, control, ack_tx));
        Ok((rx, handle))
    }

    fn joined_writers(&self) -> Result<Vec<Box<dyn RecordWriter<EnrichedRisk>>>> {
        let mut writers: Vec<Box<dyn RecordWriter<EnrichedRisk>>> = Vec::new();
        for kind in &self.config.sinks {
            match kind {
                SinkKind::Kafka => writers.push(Box::new(KafkaSink::connect(
                    &self.config.kafka,
                    &self.config.output_topic,
                )?)),
                SinkKind::Console => writers.push(Box::new(ConsoleSink::<EnrichedRisk>::stdout())),
            }
        }
        if writers.is_empty() {
            anyhow::bail!("No sink configured");
        }
        Ok(writers)
    }

    /// Connect to the brokers and spawn every task of the configured mode.
    pub fn spawn(&self) -> Result<Vec<JoinHandle<Result<()>>>> {
        let mut handles = Vec::new();
        match self.config.mode {
            Mode::Join => {
                let writers = self.joined_writers()?;
                let (profiles, profile_source) = self.spawn_kafka_source(&self.config.profile_topic)?;
                let (risks, risk_source) = self.spawn_kafka_source(&self.config.risk_topic)?;
                handles.extend([profile_source, risk_source]);
                handles.extend(self.spawn_join(profiles, risks, writers));
            }
            Mode::Events => {
                let (risks, source) = self.spawn_kafka_source(&self.config.risk_topic)?;
                handles.push(source);
                handles.extend(self.spawn_events(risks, vec![Box::new(ConsoleSink::<CustomerRisk>::stdout())]));
            }
            Mode::Customers => {
                let (profiles, source) = self.spawn_kafka_source(&self.config.profile_topic)?;
                handles.push(source);
                handles.extend(self.spawn_customers(
                    profiles,
                    vec![Box::new(ConsoleSink::<EmailBirthYear>::stdout())],
                ));
            }
        }
        info!(mode = self.config.mode.as_str(), tasks = handles.len(), "Pipeline started");
        Ok(handles)
    }

    /// Run the checkpoint coordinator alongside `handles` until the
    /// pipeline drains.
    ///
    /// Cancelling the context's token drains the pipeline through a final
    /// checkpoint. The first task failure cancels it as well, and is
    /// returned once the remaining tasks have stopped.
    pub async fn run(&self, handles: Vec<JoinHandle<Result<()>>>) -> Result<Option<ProgressMarker>> {
        let coordinator = self.coordinator.clone();
        let cancel = self.cancel.clone();
        let stopped = CancellationToken::new();
        let tasks_stopped = stopped.clone();
        let metrics = self.metrics.clone();
        let checkpoints = tokio::spawn(async move {
            coordinator
                .run(cancel, tasks_stopped, move |marker| {
                    info!(
                        checkpoint_id = marker.checkpoint_id,
                        offsets = ?marker.offsets,
                        "Progress marker written"
                    );
                    metrics.log("checkpoint");
                })
                .await
        });

        let mut tasks = JoinSet::new();
        for handle in handles {
            tasks.spawn(handle);
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) | Err(panic) => Err(anyhow::anyhow!("Pipeline task panicked: {panic}")),
            };
            if let Err(e) = result {
                error!(error = %e, "Pipeline task failed");
                self.cancel.cancel();
                failure.get_or_insert(e);
            }
        }

        // No task is left to acknowledge the final checkpoint.
        self.cancel.cancel();
        stopped.cancel();
        let last = checkpoints
            .await
            .context("Checkpoint coordinator panicked")??;

        match failure {
            Some(e) => Err(e),
            None => Ok(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::encode_profile;
    use crate::model::CustomerProfile;
    use std::time::Instant;
    use tandem_checkpoint::{AckPayload, CheckpointAck, SourceControl};
    use tandem_connectors::MemoryWriter;
    use tandem_core::StreamMessage;
    use tandem_runtime::Sender;

    fn config(dir: &std::path::Path, parallelism: usize) -> PipelineConfig {
        PipelineConfig {
            checkpoint: CheckpointConfig::new(dir)
                .with_interval(Duration::from_secs(3600))
                .with_timeout(Duration::from_secs(10)),
            join: JoinConfig {
                parallelism,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn profile_change(profile: &CustomerProfile) -> RawRecord {
        let element = encode_profile(profile).unwrap();
        let value = serde_json::json!({
            "key": "Q3VzdG9tZXI=",
            "existType": "NONE",
            "ch": false,
            "incr": false,
            "zSetEntries": [{ "element": element, "score": "0.0" }],
            "zsetEntries": [{ "element": element, "score": "0.0" }],
        });
        RawRecord::new(DEFAULT_PROFILE_TOPIC, 0, 0, value.to_string().into_bytes())
    }

    fn risk_event(json: &str) -> RawRecord {
        RawRecord::new(DEFAULT_RISK_TOPIC, 0, 0, json.as_bytes().to_vec())
    }

    fn sam() -> CustomerProfile {
        CustomerProfile {
            customer_name: Some("Sam Test".into()),
            email: Some("sam.test@test.com".into()),
            phone: Some("8015551212".into()),
            birth_day: Some("2001-01-03".into()),
        }
    }

    async fn run_to_end(handles: Vec<JoinHandle<Result<()>>>) {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_sam_test_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(config(dir.path(), 2)).await.unwrap();
        let writer = MemoryWriter::new();

        let (profile_tx, profile_rx) = stream_channel(16);
        let (risk_tx, risk_rx) = stream_channel(16);
        let handles = ctx.spawn_join(profile_rx, risk_rx, vec![Box::new(writer.clone())]);

        profile_tx.send(StreamMessage::Data(profile_change(&sam()))).await.unwrap();
        risk_tx
            .send(StreamMessage::Data(risk_event(
                r#"{"customer":"sam.test@test.com","score":-1.4,"riskDate":"2020-09-01"}"#,
            )))
            .await
            .unwrap();
        // no profile for this customer
        risk_tx
            .send(StreamMessage::Data(risk_event(r#"{"customer":"nobody@test.com","score":2.0}"#)))
            .await
            .unwrap();
        profile_tx.send(StreamMessage::End).await.unwrap();
        risk_tx.send(StreamMessage::End).await.unwrap();
        run_to_end(handles).await;

        assert_eq!(
            writer.payloads(),
            vec![r#"{"customer":"sam.test@test.com","score":-1.4,"email":"sam.test@test.com","birthYear":"2001"}"#]
        );
        assert_eq!(writer.records()[0].0.as_deref(), Some("sam.test@test.com"));
        let s = ctx.metrics().snapshot();
        assert_eq!((s.records_in, s.joined, s.emitted), (3, 1, 1));
    }

    #[tokio::test]
    async fn test_incomplete_profiles_never_reach_the_join() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(config(dir.path(), 1)).await.unwrap();
        let writer = MemoryWriter::new();

        let (profile_tx, profile_rx) = stream_channel(16);
        let (risk_tx, risk_rx) = stream_channel(16);
        let handles = ctx.spawn_join(profile_rx, risk_rx, vec![Box::new(writer.clone())]);

        let no_birthday = CustomerProfile { birth_day: None, ..sam() };
        profile_tx.send(StreamMessage::Data(profile_change(&no_birthday))).await.unwrap();
        let empty = RawRecord::new(DEFAULT_PROFILE_TOPIC, 0, 1, br#"{"zSetEntries":[]}"#.to_vec());
        profile_tx.send(StreamMessage::Data(empty)).await.unwrap();
        risk_tx
            .send(StreamMessage::Data(risk_event(r#"{"customer":"sam.test@test.com","score":1.0}"#)))
            .await
            .unwrap();
        profile_tx.send(StreamMessage::End).await.unwrap();
        risk_tx.send(StreamMessage::End).await.unwrap();
        run_to_end(handles).await;

        assert!(writer.records().is_empty());
        let s = ctx.metrics().snapshot();
        assert_eq!(s.filtered, 1);
        assert_eq!(s.extraction_errors, 1);
    }

    /// Answers checkpoint triggers the way a broker source does, reporting
    /// how many records it has sent as the next offset.
    fn spawn_test_source(
        ctx: &PipelineContext,
        topic: &'static str,
        tx: Sender<RawRecord>,
        records: Vec<RawRecord>,
    ) -> JoinHandle<Result<()>> {
        let task = format!("source-{topic}");
        ctx.coordinator().register_task(task.clone());
        let mut control = ctx.coordinator().subscribe_triggers();
        let ack_tx = ctx.coordinator().ack_sender();
        tokio::spawn(async move {
            let next = records.len() as i64;
            for record in records {
                tx.send(StreamMessage::Data(record)).await?;
            }
            loop {
                let trigger = control.recv().await?;
                let id = trigger.checkpoint_id();
                tx.send(StreamMessage::Barrier(id)).await?;
                let offsets = PartitionOffsets::from([(0, next)]);
                ack_tx
                    .send(CheckpointAck::new(task.clone(), id, AckPayload::Offsets { topic: topic.into(), offsets }))
                    .await?;
                if let SourceControl::Drain(_) = trigger {
                    tx.send(StreamMessage::End).await?;
                    return Ok(());
                }
            }
        })
    }

    #[tokio::test]
    async fn test_drain_writes_marker_and_restart_resumes_join_state() {
        let dir = tempfile::tempdir().unwrap();

        // First run: only the profile arrives before shutdown.
        let ctx = PipelineContext::new(config(dir.path(), 2)).await.unwrap();
        let writer = MemoryWriter::new();
        let (profile_tx, profile_rx) = stream_channel(16);
        let (risk_tx, risk_rx) = stream_channel(16);
        let mut handles = vec![
            spawn_test_source(&ctx, DEFAULT_PROFILE_TOPIC, profile_tx, vec![profile_change(&sam())]),
            spawn_test_source(&ctx, DEFAULT_RISK_TOPIC, risk_tx, Vec::new()),
        ];
        handles.extend(ctx.spawn_join(profile_rx, risk_rx, vec![Box::new(writer.clone())]));

        // The drain barrier follows the profile on its channel, so the
        // profile is part of the final snapshot.
        ctx.cancel_token().cancel();
        let marker = ctx.run(handles).await.unwrap().expect("final checkpoint completes");

        assert_eq!(marker.offsets_for(DEFAULT_PROFILE_TOPIC), PartitionOffsets::from([(0, 1)]));
        assert_eq!(marker.state_with_prefix(JOIN_STATE_PREFIX).count(), 2);
        assert!(writer.records().is_empty());

        // Second run with a different parallelism: the restored profile
        // matches a risk event it has never seen.
        let ctx = PipelineContext::new(config(dir.path(), 3)).await.unwrap();
        assert_eq!(ctx.resumed().map(|m| m.checkpoint_id), Some(marker.checkpoint_id));
        assert_eq!(ctx.start_offsets(DEFAULT_PROFILE_TOPIC), PartitionOffsets::from([(0, 1)]));

        let writer = MemoryWriter::new();
        let (profile_tx, profile_rx) = stream_channel(16);
        let (risk_tx, risk_rx) = stream_channel(16);
        let handles = ctx.spawn_join(profile_rx, risk_rx, vec![Box::new(writer.clone())]);
        risk_tx
            .send(StreamMessage::Data(risk_event(r#"{"customer":"sam.test@test.com","score":-1.4}"#)))
            .await
            .unwrap();
        profile_tx.send(StreamMessage::End).await.unwrap();
        risk_tx.send(StreamMessage::End).await.unwrap();
        run_to_end(handles).await;

        assert_eq!(
            writer.payloads(),
            vec![r#"{"customer":"sam.test@test.com","score":-1.4,"email":"sam.test@test.com","birthYear":"2001"}"#]
        );
    }

    #[tokio::test]
    async fn test_failed_writer_stops_run_without_waiting_for_drain_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(config(dir.path(), 1)).await.unwrap();
        let (profile_tx, profile_rx) = stream_channel(16);
        let (risk_tx, risk_rx) = stream_channel(16);
        let risk = risk_event(r#"{"customer":"sam.test@test.com","score":-1.4}"#);
        let mut handles = vec![
            spawn_test_source(&ctx, DEFAULT_PROFILE_TOPIC, profile_tx, vec![profile_change(&sam())]),
            spawn_test_source(&ctx, DEFAULT_RISK_TOPIC, risk_tx, vec![risk]),
        ];
        handles.extend(ctx.spawn_join(profile_rx, risk_rx, vec![Box::new(MemoryWriter::unreachable())]));

        // The sink can never acknowledge the final checkpoint, whose timeout
        // is ten seconds.
        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(5), ctx.run(handles))
            .await
            .expect("run waited for the checkpoint timeout");

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ctx.coordinator().storage().latest_marker().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_events_mode_prints_customer_and_score() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(PipelineConfig {
            mode: Mode::Events,
            ..config(dir.path(), 1)
        })
        .await
        .unwrap();
        let writer = MemoryWriter::new();
        let (risk_tx, risk_rx) = stream_channel(16);
        let handles = ctx.spawn_events(risk_rx, vec![Box::new(writer.clone())]);

        risk_tx
            .send(StreamMessage::Data(risk_event(r#"{"customer":"a@test.com","score":0.5,"riskDate":"2020-09-01"}"#)))
            .await
            .unwrap();
        risk_tx.send(StreamMessage::End).await.unwrap();
        run_to_end(handles).await;

        assert_eq!(writer.payloads(), vec![r#"{"customer":"a@test.com","score":0.5}"#]);
        assert!(dir.path().join("events").is_dir());
    }

    #[tokio::test]
    async fn test_customers_mode_prints_email_and_birth_year() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(PipelineConfig {
            mode: Mode::Customers,
            ..config(dir.path(), 1)
        })
        .await
        .unwrap();
        let writer = MemoryWriter::new();
        let (profile_tx, profile_rx) = stream_channel(16);
        let handles = ctx.spawn_customers(profile_rx, vec![Box::new(writer.clone())]);

        profile_tx.send(StreamMessage::Data(profile_change(&sam()))).await.unwrap();
        profile_tx.send(StreamMessage::End).await.unwrap();
        run_to_end(handles).await;

        assert_eq!(writer.payloads(), vec![r#"{"email":"sam.test@test.com","birthYear":"2001"}"#]);
    }
}
