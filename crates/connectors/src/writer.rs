//! Output writers shared by every sink stage.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// A record that can be rendered as a row of a console table.
pub trait TableRow {
    /// Column headers, in display order.
    fn columns() -> &'static [&'static str];

    /// Cell values, one per column.
    fn cells(&self) -> Vec<String>;
}

/// A record after serialization, handed to every writer.
///
/// Writers that publish bytes use `key` and `payload`; writers that render
/// a view (the console table) use `row`.
#[derive(Debug)]
pub struct EncodedRecord<'a, R> {
    pub key: Option<&'a str>,
    pub payload: &'a [u8],
    pub row: &'a R,
}

impl<R> Clone for EncodedRecord<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for EncodedRecord<'_, R> {}

/// Destination for encoded records.
///
/// A write error means the destination is unreachable; callers surface it
/// rather than skipping the record.
#[async_trait]
pub trait RecordWriter<R: Sync>: Send {
    fn name(&self) -> &str;

    async fn write(&mut self, record: EncodedRecord<'_, R>) -> Result<()>;

    /// Make everything written so far durable at the destination.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps written payloads in memory; used in tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryWriter {
    records: Arc<Mutex<Vec<(Option<String>, Vec<u8>)>>>,
    flushes: Arc<Mutex<usize>>,
    fail_writes: bool,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer whose every write fails, as if the destination were down.
    pub fn unreachable() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// (key, payload) pairs written so far.
    pub fn records(&self) -> Vec<(Option<String>, Vec<u8>)> {
        self.records.lock().clone()
    }

    /// Payloads written so far, as UTF-8 text.
    pub fn payloads(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|(_, p)| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.lock()
    }
}

#[async_trait]
impl<R: Sync> RecordWriter<R> for MemoryWriter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&mut self, record: EncodedRecord<'_, R>) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("memory writer is unreachable");
        }
        self.records
            .lock()
            .push((record.key.map(str::to_string), record.payload.to_vec()));
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        *self.flushes.lock() += 1;
        Ok(())
    }
}
