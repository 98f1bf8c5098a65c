//! Per-table batching task.

use super::{Row, Sink, TableSpec};
use crate::core::retry::{retry_with_config, RetryConfig};
use crate::record::Pooled;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Message<R: Row> {
    Row(Pooled<R>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Counters of one batch writer.
#[derive(Debug, Default)]
pub struct WriterCounters {
    pub received: AtomicU64,
    pub written: AtomicU64,
    /// Rows rejected because the channel was full or closed
    pub dropped: AtomicU64,
    pub failed_batches: AtomicU64,
    pub failed_rows: AtomicU64,
    pub flushes: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriterStats {
    pub table: String,
    pub received: u64,
    pub written: u64,
    pub dropped: u64,
    pub failed_batches: u64,
    pub failed_rows: u64,
    pub flushes: u64,
}

/// Collects rows of one table and flushes them to a sink.
pub struct BatchWriter<R: Row> {
    table: Arc<TableSpec>,
    sender: mpsc::Sender<Message<R>>,
    counters: Arc<WriterCounters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Row> BatchWriter<R> {
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        table: TableSpec,
        sink: Arc<dyn Sink>,
        batch_size: usize,
        flush_timeout: Duration,
        channel_capacity: usize,
        retry: RetryConfig,
    ) -> Self {
        let table = Arc::new(table);
        let (sender, receiver) = mpsc::channel(channel_capacity.max(1));
        let counters = Arc::new(WriterCounters::default());

        let task = BatchTask {
            table: Arc::clone(&table),
            sink,
            batch: Vec::with_capacity(batch_size.min(65_536)),
            batch_size: batch_size.max(1),
            payload: Vec::new(),
            retry,
            counters: Arc::clone(&counters),
        };
        let handle = runtime.spawn(task.run(receiver, flush_timeout));

        Self {
            table,
            sender,
            counters,
            task: Mutex::new(Some(handle)),
        }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    /// Queue `row` without waiting. A full channel drops the row.
    pub fn send(&self, row: Pooled<R>) -> bool {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(Message::Row(row)) {
            Ok(()) => true,
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            },
        }
    }

    /// Flush pending rows and wait for the sink.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Flush pending rows and stop the task. Later sends are dropped.
    pub async fn close(&self) {
        let _ = self.sender.send(Message::Shutdown).await;
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(table = %self.table.qualified_name(), "batch writer task failed: {}", e);
            }
        }
    }

    pub fn stats(&self) -> WriterStats {
        let c = &self.counters;
        WriterStats {
            table: self.table.qualified_name(),
            received: c.received.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            failed_rows: c.failed_rows.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
        }
    }
}

struct BatchTask<R: Row> {
    table: Arc<TableSpec>,
    sink: Arc<dyn Sink>,
    batch: Vec<Pooled<R>>,
    batch_size: usize,
    payload: Vec<u8>,
    retry: RetryConfig,
    counters: Arc<WriterCounters>,
}

impl<R: Row> BatchTask<R> {
    async fn run(mut self, mut receiver: mpsc::Receiver<Message<R>>, flush_timeout: Duration) {
        let mut ticker = tokio::time::interval(flush_timeout.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(Message::Row(row)) => {
                        self.batch.push(row);
                        if self.batch.len() >= self.batch_size {
                            self.flush().await;
                        }
                    },
                    Some(Message::Flush(done)) => {
                        self.flush().await;
                        let _ = done.send(());
                    },
                    Some(Message::Shutdown) | None => {
                        self.flush().await;
                        break;
                    },
                },
                _ = ticker.tick() => {
                    self.flush().await;
                },
            }
        }

        // rows queued behind the shutdown message are dropped back to their pool
        receiver.close();
        tracing::debug!(table = %self.table.qualified_name(), "batch writer stopped");
    }

    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        self.payload.clear();
        let mut rows = 0;
        for row in &self.batch {
            match serde_json::to_writer(&mut self.payload, &**row) {
                Ok(()) => {
                    self.payload.push(b'\n');
                    rows += 1;
                },
                Err(e) => {
                    self.counters.failed_rows.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(table = %self.table.qualified_name(), "failed to encode row: {}", e);
                },
            }
        }

        let table = self.table.as_ref();
        let sink = self.sink.as_ref();
        let payload = self.payload.as_slice();
        let result = retry_with_config(&self.retry, || sink.write_batch(table, payload, rows)).await;

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(()) => {
                self.counters.written.fetch_add(rows as u64, Ordering::Relaxed);
                tracing::debug!(table = %table.qualified_name(), rows, "flushed batch");
            },
            Err(e) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.counters.failed_rows.fetch_add(rows as u64, Ordering::Relaxed);
                tracing::error!(
                    table = %table.qualified_name(),
                    rows,
                    "giving up on batch: {}",
                    e
                );
            },
        }

        // returns every row to its pool
        self.batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::FlowLogId;
    use crate::record::{Poolable, RecordPool};
    use crate::writer::MemorySink;

    #[derive(Debug, Default, Serialize)]
    struct Line {
        n: u32,
    }

    impl Poolable for Line {
        fn reset(&mut self) {
            self.n = 0;
        }
    }

    fn spawn(
        sink: &Arc<MemorySink>,
        batch_size: usize,
        flush_timeout: Duration,
        capacity: usize,
    ) -> BatchWriter<Line> {
        let retry = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            jitter: false,
            ..RetryConfig::default()
        };
        BatchWriter::spawn(
            &tokio::runtime::Handle::current(),
            TableSpec::for_flow_log(FlowLogId::L7Flow, &Config::default()),
            Arc::clone(sink) as Arc<dyn Sink>,
            batch_size,
            flush_timeout,
            capacity,
            retry,
        )
    }

    fn line(pool: &RecordPool<Line>, n: u32) -> Pooled<Line> {
        let mut row = pool.acquire();
        row.n = n;
        row
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flush_on_batch_size() {
        let sink = Arc::new(MemorySink::new());
        let writer = spawn(&sink, 2, Duration::from_secs(3600), 16);
        let pool = RecordPool::new(8);

        writer.send(line(&pool, 1));
        writer.send(line(&pool, 2));
        writer.send(line(&pool, 3));
        writer.flush().await;

        let rows = sink.rows("flow_log.l7_flow_log");
        let values: Vec<u64> = rows.iter().map(|r| r["n"].as_u64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(sink.batches("flow_log.l7_flow_log"), 2);
        assert_eq!(writer.stats().written, 3);
        assert_eq!(pool.stats().returns, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flush_on_timeout() {
        let sink = Arc::new(MemorySink::new());
        let writer = spawn(&sink, 1000, Duration::from_millis(20), 16);
        let pool = RecordPool::new(8);
        writer.send(line(&pool, 1));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.row_count("flow_log.l7_flow_log"), 1);
        writer.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recoverable_failures_retried() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(2);
        let writer = spawn(&sink, 10, Duration::from_secs(3600), 16);
        let pool = RecordPool::new(8);
        writer.send(line(&pool, 1));
        writer.close().await;

        assert_eq!(sink.row_count("flow_log.l7_flow_log"), 1);
        let stats = writer.stats();
        assert_eq!(stats.written, 1);
        assert_eq!(stats.failed_batches, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gives_up_after_max_attempts() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(10);
        let writer = spawn(&sink, 10, Duration::from_secs(3600), 16);
        let pool = RecordPool::new(8);
        writer.send(line(&pool, 1));
        writer.close().await;

        let stats = writer.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.failed_rows, 1);
        assert_eq!(sink.row_count("flow_log.l7_flow_log"), 0);
        // the row still went back to its pool
        assert_eq!(pool.stats().returns, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_writer_drops() {
        let sink = Arc::new(MemorySink::new());
        let writer = spawn(&sink, 10, Duration::from_secs(3600), 16);
        writer.close().await;

        let pool = RecordPool::new(2);
        assert!(!writer.send(line(&pool, 1)));
        assert_eq!(writer.stats().dropped, 1);
    }
}
