//! Tabular console writer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::marker::PhantomData;

use crate::writer::{EncodedRecord, RecordWriter, TableRow};

const MIN_COLUMN_WIDTH: usize = 16;

/// Prints records as rows of a table: the header once, then one row per
/// record. Cells wider than their column widen that row instead of being
/// cut.
pub struct ConsoleSink<R, W = std::io::Stdout> {
    out: W,
    header_written: bool,
    _row: PhantomData<fn(&R)>,
}

impl<R: TableRow> ConsoleSink<R> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<R: TableRow, W: Write> ConsoleSink<R, W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
            _row: PhantomData,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn widths() -> Vec<usize> {
        R::columns()
            .iter()
            .map(|c| c.len().max(MIN_COLUMN_WIDTH))
            .collect()
    }

    fn separator(widths: &[usize]) -> String {
        let mut line = String::from("+");
        for w in widths {
            line.push_str(&"-".repeat(*w));
            line.push('+');
        }
        line
    }

    fn render(cells: &[String], widths: &[usize]) -> String {
        let mut line = String::from("|");
        for (cell, w) in cells.iter().zip(widths) {
            line.push_str(&format!("{cell:<w$}|"));
        }
        line
    }

    fn write_row(&mut self, row: &R) -> Result<()> {
        let widths = Self::widths();
        if !self.header_written {
            let header: Vec<String> = R::columns().iter().map(|c| c.to_string()).collect();
            let sep = Self::separator(&widths);
            writeln!(self.out, "{sep}")?;
            writeln!(self.out, "{}", Self::render(&header, &widths))?;
            writeln!(self.out, "{sep}")?;
            self.header_written = true;
        }
        writeln!(self.out, "{}", Self::render(&row.cells(), &widths))?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> RecordWriter<R> for ConsoleSink<R, W>
where
    R: TableRow + Sync,
    W: Write + Send,
{
    fn name(&self) -> &str {
        "console"
    }

    async fn write(&mut self, record: EncodedRecord<'_, R>) -> Result<()> {
        self.write_row(record.row).context("Failed to write to console")
    }

    async fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush console")
    }
}
