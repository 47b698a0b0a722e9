//! Terminal stage: encode each record and hand it to every writer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tandem_checkpoint::{AckPayload, CheckpointAck};
use tandem_connectors::{EncodedRecord, RecordWriter};
use tandem_core::StreamMessage;
use tandem_runtime::{PipelineMetrics, Sink};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{encode, OutputRecord};

/// Name under which the sink acknowledges checkpoints.
pub const SINK_TASK: &str = "sink";

/// Encodes records as JSON and writes them to every configured writer.
///
/// A record that cannot be encoded is dropped and counted. A writer error
/// stops the stage: the destination is unreachable and the pipeline must
/// restart from the last progress marker.
pub struct SinkStage<R> {
    writers: Vec<Box<dyn RecordWriter<R>>>,
    ack_tx: Option<mpsc::Sender<CheckpointAck>>,
    metrics: Arc<PipelineMetrics>,
}

impl<R: OutputRecord> SinkStage<R> {
    pub fn new(writers: Vec<Box<dyn RecordWriter<R>>>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            writers,
            ack_tx: None,
            metrics,
        }
    }

    /// Acknowledge each checkpoint once everything before its barrier is
    /// flushed.
    pub fn with_checkpointing(mut self, ack_tx: mpsc::Sender<CheckpointAck>) -> Self {
        self.ack_tx = Some(ack_tx);
        self
    }

    async fn write(&mut self, record: R) -> Result<()> {
        let payload = match encode(&record) {
            Ok(payload) => payload,
            Err(e) => {
                PipelineMetrics::incr(&self.metrics.serialization_errors);
                warn!(error = %e, "Dropped record that could not be encoded");
                return Ok(());
            }
        };

        let encoded = EncodedRecord {
            key: record.key(),
            payload: &payload,
            row: &record,
        };
        for writer in &mut self.writers {
            let name = writer.name().to_string();
            writer
                .write(encoded)
                .await
                .with_context(|| format!("Writer {name} failed"))?;
        }
        PipelineMetrics::incr(&self.metrics.emitted);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        for writer in &mut self.writers {
            let name = writer.name().to_string();
            writer
                .flush()
                .await
                .with_context(|| format!("Writer {name} failed to flush"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R: OutputRecord> Sink for SinkStage<R> {
    type In = R;

    async fn on_message(&mut self, msg: StreamMessage<R>) -> Result<()> {
        match msg {
            StreamMessage::Data(record) => self.write(record).await,
            StreamMessage::Watermark(_) => Ok(()),
            StreamMessage::Barrier(checkpoint_id) => {
                self.flush().await?;
                if let Some(ack_tx) = &self.ack_tx {
                    ack_tx
                        .send(CheckpointAck::new(SINK_TASK, checkpoint_id, AckPayload::Flushed))
                        .await
                        .map_err(|_| anyhow::anyhow!("checkpoint coordinator is gone"))?;
                }
                debug!(checkpoint_id, "Sink flushed for checkpoint");
                Ok(())
            }
            StreamMessage::End => {
                self.flush().await?;
                info!(emitted = self.metrics.snapshot().emitted, "Sink drained");
                Ok(())
            }
        }
    }
}
