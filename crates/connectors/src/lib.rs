//! Connectors between the pipeline and the outside world.
//!
//! ## Available Connectors
//!
//! - **Kafka** (enabled by default): a partition-assigned source that takes
//!   part in checkpoints, and a producer-backed record writer
//! - **Console**: a tabular writer for diagnostics and local runs
//!
//! ## Feature Flags
//!
//! - `kafka`: Enable the Kafka connector (default)
//!
//! ## Example
//!
//! ```ignore
//! use tandem_connectors::kafka::{KafkaConfig, KafkaSource};
//!
//! let config = KafkaConfig::new("localhost:9092").with_group_id("stedi-risk");
//! let mut source = KafkaSource::new(config, "stedi-events")
//!     .with_start_offsets(marker.offsets_for("stedi-events"));
//! source.connect()?;
//! ```

pub mod console;
pub mod progress;
pub mod writer;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use console::ConsoleSink;
pub use progress::SourceProgress;
pub use writer::{EncodedRecord, MemoryWriter, RecordWriter, TableRow};
