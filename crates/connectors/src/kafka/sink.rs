//! Kafka sink connector.

use crate::kafka::config::KafkaConfig;
use crate::writer::{EncodedRecord, RecordWriter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info};

/// Produces encoded records to one topic.
///
/// Each write waits for the broker acknowledgment, so a successful flush
/// at a barrier means every earlier record is durable.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaSink {
    pub fn connect(config: &KafkaConfig, topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        let mut client_config = config.client_config();
        client_config
            .set("message.timeout.ms", config.request_timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true");

        let producer: FutureProducer = client_config
            .create()
            .context("Failed to create Kafka producer")?;

        info!(topic = %topic, "Kafka sink connected");
        Ok(Self {
            producer,
            topic,
            timeout: config.request_timeout,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl<R: Sync> RecordWriter<R> for KafkaSink {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn write(&mut self, record: EncodedRecord<'_, R>) -> Result<()> {
        let mut message: FutureRecord<'_, str, [u8]> =
            FutureRecord::to(&self.topic).payload(record.payload);
        if let Some(key) = record.key {
            message = message.key(key);
        }

        self.producer
            .send(message, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to deliver to {}: {e}", self.topic))?;
        debug!(topic = %self.topic, "Record delivered");
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.producer
            .flush(Timeout::After(self.timeout))
            .with_context(|| format!("Failed to flush producer for {}", self.topic))
    }
}
