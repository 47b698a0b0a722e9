//! Apache Kafka connector.
//!
//! - **Source**: assigns every partition of one topic explicitly, starting
//!   from checkpointed offsets (or the earliest offset on a first run), and
//!   injects barriers when the checkpoint coordinator asks for them
//! - **Sink**: a [`RecordWriter`](crate::RecordWriter) that produces each
//!   record and waits for the broker to acknowledge it
//! - **Event time**: taken from the broker timestamp, falling back to the
//!   time the record was read

mod config;
mod sink;
mod source;

pub use config::KafkaConfig;
pub use sink::KafkaSink;
pub use source::KafkaSource;
