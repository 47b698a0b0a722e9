//! Per-record work done before the join: decode, extract, project.

use std::sync::Arc;
use tandem_core::{RawRecord, Timestamped};
use tandem_runtime::PipelineMetrics;
use tracing::debug;

use crate::decoder::{RecordDecoder, RecordSchema};
use crate::extract::NestedPayloadExtractor;
use crate::model::{CustomerRisk, EmailBirthYear};
use crate::project::{project, project_risk};

/// Turns raw profile-change records into `(email, birthYear)` tuples.
pub struct ProfileStage {
    decoder: RecordDecoder,
    extractor: NestedPayloadExtractor,
    metrics: Arc<PipelineMetrics>,
}

impl ProfileStage {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self::with_schemas(RecordSchema::profile_change(), RecordSchema::customer_profile(), metrics)
    }

    pub fn with_schemas(
        envelope: RecordSchema,
        profile: RecordSchema,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            decoder: RecordDecoder::new(envelope),
            extractor: NestedPayloadExtractor::new(profile),
            metrics,
        }
    }

    pub fn process(&self, raw: RawRecord) -> Option<Timestamped<EmailBirthYear>> {
        PipelineMetrics::incr(&self.metrics.records_in);

        let decoded = self.decoder.decode_profile_change(&raw.value);
        if decoded.is_degraded() {
            PipelineMetrics::incr(&self.metrics.decode_errors);
            debug!(
                topic = %raw.topic,
                partition = raw.partition,
                offset = raw.offset,
                schema = self.decoder.schema().name(),
                errors = ?decoded.errors,
                "Profile change decoded with errors"
            );
        }

        let profile = match self.extractor.extract(&decoded.record) {
            Ok(profile) => profile,
            Err(e) => {
                PipelineMetrics::incr(&self.metrics.extraction_errors);
                debug!(
                    topic = %raw.topic,
                    partition = raw.partition,
                    offset = raw.offset,
                    error = %e,
                    "Dropped profile change"
                );
                return None;
            }
        };

        match project(profile) {
            Some(tuple) => Some(Timestamped::new(raw.ingested_at, tuple).with_origin(raw.position())),
            None => {
                PipelineMetrics::incr(&self.metrics.filtered);
                None
            }
        }
    }
}

/// Turns raw risk-score records into `(customer, score)` pairs.
pub struct RiskStage {
    decoder: RecordDecoder,
    metrics: Arc<PipelineMetrics>,
}

impl RiskStage {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self::with_schema(RecordSchema::risk_score(), metrics)
    }

    pub fn with_schema(schema: RecordSchema, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            decoder: RecordDecoder::new(schema),
            metrics,
        }
    }

    pub fn process(&self, raw: RawRecord) -> Option<Timestamped<CustomerRisk>> {
        PipelineMetrics::incr(&self.metrics.records_in);

        let decoded = self.decoder.decode_risk_event(&raw.value);
        if decoded.is_degraded() {
            PipelineMetrics::incr(&self.metrics.decode_errors);
            debug!(
                topic = %raw.topic,
                partition = raw.partition,
                offset = raw.offset,
                schema = self.decoder.schema().name(),
                errors = ?decoded.errors,
                "Risk event decoded with errors"
            );
        }

        match project_risk(decoded.record) {
            Some(risk) => Some(Timestamped::new(raw.ingested_at, risk).with_origin(raw.position())),
            None => {
                PipelineMetrics::incr(&self.metrics.filtered);
                None
            }
        }
    }
}
