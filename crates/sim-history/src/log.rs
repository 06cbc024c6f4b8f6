//! History Log
//!
//! Append-only JSONL persistence of flattened history rows.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::{History, HistoryError, HistoryRow};

/// Errors raised while reading a history log back.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to read history log: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed history row on line {line}: {source}")]
    Row {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Writes history rows to a JSONL file, one `[entity, tick, attribute, value,
/// value_type]` array per line.
pub struct HistoryLog {
    writer: Option<BufWriter<File>>,
    row_count: u64,
}

impl HistoryLog {
    /// Create a new log writing to the specified path
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            row_count: 0,
        })
    }

    /// Create a log that discards rows (dry runs)
    pub fn null() -> Self {
        Self {
            writer: None,
            row_count: 0,
        }
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn log(&mut self, row: &HistoryRow) -> std::io::Result<()> {
        self.row_count += 1;
        if let Some(ref mut writer) = self.writer {
            let json = serde_json::to_string(row)?;
            writeln!(writer, "{}", json)?;
        }
        Ok(())
    }

    pub fn log_batch(&mut self, rows: impl IntoIterator<Item = HistoryRow>) -> std::io::Result<()> {
        for row in rows {
            self.log(&row)?;
        }
        Ok(())
    }

    /// Flush the buffer to disk
    pub fn flush(&mut self) -> std::io::Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for HistoryLog {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to flush history log: {}", e);
        }
    }
}

/// Reloads a log written by [`HistoryLog`], restoring value types.
pub fn read_history(path: impl AsRef<Path>) -> Result<History, LogError> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: HistoryRow = serde_json::from_str(&line).map_err(|source| LogError::Row {
            line: index + 1,
            source,
        })?;
        rows.push(row);
    }
    Ok(History::from_rows(rows)?)
}
