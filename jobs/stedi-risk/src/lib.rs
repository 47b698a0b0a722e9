//! STEDI risk enrichment job.
//!
//! Reads customer profile changes and risk-score events from Kafka, joins
//! them on the customer's email, and writes
//! `{customer, score, email, birthYear}` records:
//!   profile source -> decode -> extract -> project --+
//!                                                    +-> keyed join -> sink
//!   risk source ----> decode -> project -------------+
//!
//! Exports:
//! - `RecordDecoder`: schema-driven JSON decoding that degrades instead of failing
//! - `NestedPayloadExtractor`: recovers the profile base64-encoded in a change event
//! - `PipelineContext`: wires sources, stages, join and sinks with checkpointing

pub mod config;
pub mod decoder;
pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod project;
pub mod sink;
pub mod stages;

pub use config::Args;
pub use decoder::{Decoded, FieldType, Fields, RecordDecoder, RecordSchema};
pub use error::{DecodeError, ExtractionError, SerializationError};
pub use extract::{encode_profile, NestedPayloadExtractor};
pub use model::{CustomerProfile, CustomerRisk, EmailBirthYear, EnrichedRisk, OutputRecord, RiskEvent};
pub use pipeline::{Mode, PipelineConfig, PipelineContext, SinkKind};
pub use sink::SinkStage;
pub use stages::{ProfileStage, RiskStage};
