//! Storage sinks receiving flushed batches.

use super::TableSpec;
use crate::core::{IngestError, Result};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::AsyncWriteExt;

/// Destination of flushed batches.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Write `rows` newline-delimited JSON rows to `table`.
    ///
    /// Errors for which [`IngestError::is_recoverable`] holds are retried by
    /// the caller.
    async fn write_batch(&self, table: &TableSpec, payload: &[u8], rows: usize) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Appends each table's rows to `<dir>/<database>.<table>.jsonl`.
pub struct JsonLinesSink {
    dir: PathBuf,
    files: tokio::sync::Mutex<AHashMap<String, tokio::fs::File>>,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: tokio::sync::Mutex::new(AHashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File the rows of `table` end up in.
    pub fn path_for(&self, table: &TableSpec) -> PathBuf {
        self.dir.join(format!("{}.jsonl", table.qualified_name()))
    }
}

#[async_trait::async_trait]
impl Sink for JsonLinesSink {
    async fn write_batch(&self, table: &TableSpec, payload: &[u8], _rows: usize) -> Result<()> {
        let mut files = self.files.lock().await;
        let name = table.qualified_name();
        if !files.contains_key(&name) {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(table))
                .await?;
            files.insert(name.clone(), file);
        }
        let file = files
            .get_mut(&name)
            .ok_or_else(|| IngestError::storage(format!("no file for {}", name)))?;
        file.write_all(payload).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

#[derive(Default)]
struct MemoryTable {
    rows: Vec<serde_json::Value>,
    batches: usize,
}

/// Keeps every row in memory, keyed by `database.table`.
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<AHashMap<String, MemoryTable>>,
    failures: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes with a recoverable error.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn rows(&self, table: &str) -> Vec<serde_json::Value> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, |t| t.rows.len())
    }

    pub fn batches(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, |t| t.batches)
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn write_batch(&self, table: &TableSpec, payload: &[u8], rows: usize) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IngestError::network(format!(
                "injected failure writing {}",
                table.qualified_name()
            )));
        }

        let mut parsed: Vec<serde_json::Value> = Vec::with_capacity(rows);
        for line in payload.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            parsed.push(serde_json::from_slice(line)?);
        }

        let mut tables = self.tables.lock();
        let entry = tables.entry(table.qualified_name()).or_default();
        entry.rows.extend(parsed);
        entry.batches += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
