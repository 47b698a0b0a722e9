//! Core types shared across the engine.

use serde::{Deserialize, Serialize};

/// Milliseconds since Unix epoch (or any monotonic-ish reference; up to the source).
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Messages flowing through operator edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamMessage<T> {
    Data(T),
    /// Event-time watermark.
    Watermark(Timestamp),
    /// Checkpoint barrier (id).
    Barrier(u64),
    /// End of stream (for bounded inputs / controlled shutdown).
    End,
}

impl<T> StreamMessage<T> {
    /// Map the data payload, passing control messages through untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StreamMessage<U> {
        match self {
            StreamMessage::Data(v) => StreamMessage::Data(f(v)),
            StreamMessage::Watermark(ts) => StreamMessage::Watermark(ts),
            StreamMessage::Barrier(id) => StreamMessage::Barrier(id),
            StreamMessage::End => StreamMessage::End,
        }
    }

    /// Split off the data payload; control messages come back retyped.
    pub fn into_control<U>(self) -> Result<StreamMessage<U>, T> {
        match self {
            StreamMessage::Data(v) => Err(v),
            StreamMessage::Watermark(ts) => Ok(StreamMessage::Watermark(ts)),
            StreamMessage::Barrier(id) => Ok(StreamMessage::Barrier(id)),
            StreamMessage::End => Ok(StreamMessage::End),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, StreamMessage::End)
    }
}

/// A record as pulled from a broker partition, before any decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    /// Broker timestamp if present, otherwise the time the record was read.
    pub ingested_at: Timestamp,
}

impl RawRecord {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value,
            ingested_at: now_millis(),
        }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_ingested_at(mut self, ts: Timestamp) -> Self {
        self.ingested_at = ts;
        self
    }

    pub fn position(&self) -> SourcePosition {
        SourcePosition {
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Where a record was read within its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    pub partition: i32,
    pub offset: i64,
}

/// A value tagged with the time it entered the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub ts: Timestamp,
    pub value: T,
    /// Set when the value came from a single broker record. A replay after
    /// restart carries the same origin again.
    #[serde(default)]
    pub origin: Option<SourcePosition>,
}

impl<T> Timestamped<T> {
    pub fn new(ts: Timestamp, value: T) -> Self {
        Self {
            ts,
            value,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: SourcePosition) -> Self {
        self.origin = Some(origin);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_keeps_control_messages() {
        let wm: StreamMessage<i32> = StreamMessage::Watermark(7);
        assert_eq!(wm.map(|v| v * 2), StreamMessage::Watermark(7));

        let data = StreamMessage::Data(21);
        assert_eq!(data.map(|v| v * 2), StreamMessage::Data(42));

        let barrier: StreamMessage<i32> = StreamMessage::Barrier(3);
        assert_eq!(barrier.map(|v| v + 1), StreamMessage::Barrier(3));
    }
}
