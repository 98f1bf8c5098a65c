//! Partitioned bounded queues between the receiver and the decoders.
//!
//! A queue set is N independent FIFOs. Producers never block: when a
//! partition is full the item is handed to the release callback instead.
//! Consumers block for at most one flush indicator interval, so an idle
//! decoder still wakes up regularly to flush what it holds.

use crate::core::{IngestError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback receiving items the queue set is done with.
pub type ReleaseFn<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Interval used when no flush indicator option is given.
pub const DEFAULT_FLUSH_INDICATOR: Duration = Duration::from_secs(1);

/// Optional queue set behavior.
pub enum QueueOption<T> {
    /// Wake idle consumers with [`Fetch::FlushTick`] at this interval.
    FlushIndicator(Duration),
    /// Called with every item dropped on overflow or released by a consumer.
    Release(ReleaseFn<T>),
}

/// Counters of one queue set.
#[derive(Debug, Default)]
pub struct QueueCounters {
    pub put: AtomicU64,
    pub overflow: AtomicU64,
    pub released: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QueueStats {
    pub name: String,
    pub put: u64,
    pub overflow: u64,
    pub released: u64,
    /// Items waiting in each partition
    pub pending: Vec<usize>,
}

struct Shared<T> {
    name: String,
    release: Option<ReleaseFn<T>>,
    counters: QueueCounters,
}

impl<T> Shared<T> {
    fn release(&self, item: T) {
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        if let Some(release) = &self.release {
            release(item);
        }
    }
}

/// Result of one [`QueueReader::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// This many items were appended to the output.
    Items(usize),
    /// Nothing arrived within one flush indicator interval.
    FlushTick,
    /// Every producer is gone and the partition is drained.
    Closed,
}

/// A partitioned queue set: one writer handle, one reader per partition.
pub struct QueueSet<T> {
    pub writer: QueueWriter<T>,
    pub readers: Vec<QueueReader<T>>,
    pub monitor: QueueMonitor<T>,
}

/// Create `count` bounded queues of `capacity` items each, named `name`.
///
/// Only one consumer per partition is supported.
pub fn new_queues<T: Send + 'static>(
    name: impl Into<String>,
    capacity: usize,
    count: usize,
    consumers_per_partition: usize,
    options: Vec<QueueOption<T>>,
) -> Result<QueueSet<T>> {
    let name = name.into();
    if count == 0 {
        return Err(IngestError::config(format!("queue set {} needs at least one partition", name)));
    }
    if capacity == 0 {
        return Err(IngestError::config(format!("queue set {} needs a capacity", name)));
    }
    if consumers_per_partition != 1 {
        return Err(IngestError::config(format!(
            "queue set {}: {} consumers per partition requested, only 1 is supported",
            name, consumers_per_partition
        )));
    }

    let mut flush_indicator = DEFAULT_FLUSH_INDICATOR;
    let mut release = None;
    for option in options {
        match option {
            QueueOption::FlushIndicator(interval) => flush_indicator = interval,
            QueueOption::Release(callback) => release = Some(callback),
        }
    }
    if flush_indicator.is_zero() {
        return Err(IngestError::config(format!("queue set {}: flush indicator must be positive", name)));
    }

    let shared = Arc::new(Shared {
        name,
        release,
        counters: QueueCounters::default(),
    });

    let (senders, receivers): (Vec<_>, Vec<_>) = (0..count).map(|_| bounded(capacity)).unzip();
    let monitor = QueueMonitor {
        receivers: receivers.clone(),
        shared: Arc::clone(&shared),
    };
    let readers = receivers
        .into_iter()
        .enumerate()
        .map(|(index, receiver)| QueueReader {
            index,
            receiver,
            flush_indicator,
            shared: Arc::clone(&shared),
        })
        .collect();

    Ok(QueueSet {
        writer: QueueWriter { senders, shared },
        readers,
        monitor,
    })
}

/// Producer side of a queue set. Dropping every clone closes the set.
pub struct QueueWriter<T> {
    senders: Vec<Sender<T>>,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for QueueWriter<T> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> QueueWriter<T> {
    pub fn partitions(&self) -> usize {
        self.senders.len()
    }

    /// Enqueue `item` on `partition` (taken modulo the partition count).
    ///
    /// Returns `false` when the item was not queued; it has then already
    /// been handed to the release callback.
    pub fn put(&self, partition: usize, item: T) -> bool {
        let sender = &self.senders[partition % self.senders.len()];
        match sender.try_send(item) {
            Ok(()) => {
                self.shared.counters.put.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                self.shared.counters.overflow.fetch_add(1, Ordering::Relaxed);
                self.shared.release(item);
                false
            },
        }
    }
}

impl<T> fmt::Debug for QueueWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueWriter")
            .field("name", &self.shared.name)
            .field("partitions", &self.senders.len())
            .finish()
    }
}

/// Read-only view of a queue set's counters.
///
/// Holding a monitor does not keep the set open.
pub struct QueueMonitor<T> {
    receivers: Vec<Receiver<T>>,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for QueueMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            receivers: self.receivers.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> QueueMonitor<T> {
    pub fn stats(&self) -> QueueStats {
        let counters = &self.shared.counters;
        QueueStats {
            name: self.shared.name.clone(),
            put: counters.put.load(Ordering::Relaxed),
            overflow: counters.overflow.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
            pending: self.receivers.iter().map(Receiver::len).collect(),
        }
    }
}

/// Consumer side of one partition.
pub struct QueueReader<T> {
    index: usize,
    receiver: Receiver<T>,
    flush_indicator: Duration,
    shared: Arc<Shared<T>>,
}

impl<T> QueueReader<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Wait for items and move up to `max` of them into `out`.
    ///
    /// Blocks for at most one flush indicator interval.
    pub fn fetch(&self, out: &mut Vec<T>, max: usize) -> Fetch {
        let first = match self.receiver.recv_timeout(self.flush_indicator) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => return Fetch::FlushTick,
            Err(RecvTimeoutError::Disconnected) => return Fetch::Closed,
        };
        out.push(first);

        let mut fetched = 1;
        while fetched < max {
            match self.receiver.try_recv() {
                Ok(item) => {
                    out.push(item);
                    fetched += 1;
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Fetch::Items(fetched)
    }

    /// Hand a consumed item to the release callback.
    pub fn release(&self, item: T) {
        self.shared.release(item);
    }
}
