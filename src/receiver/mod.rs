//! In-process entry point for agent payloads.
//!
//! The receiver owns no sockets: transports hand it raw payloads and it
//! routes them, per message type, to the decode queue set registered for
//! that type. A stream (agent) always lands on the same partition, so its
//! records are decoded in arrival order.

use crate::core::{IngestError, MessageType, Result};
use crate::queue::QueueWriter;
use crate::record::{Poolable, Pooled, RecordPool};
use ahash::AHashMap;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// One inbound payload, recycled through the receiver's buffer pool.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    pub message_type: MessageType,
    pub vtap_id: u16,
    pub payload: BytesMut,
    pub received_at: DateTime<Utc>,
}

impl Poolable for RecvBuffer {
    fn reset(&mut self) {
        self.message_type = MessageType::default();
        self.vtap_id = 0;
        self.payload.clear();
        self.received_at = DateTime::<Utc>::default();
    }
}

/// Queue set writer that accepts pooled receive buffers.
pub type BufferQueue = QueueWriter<Pooled<RecvBuffer>>;

#[derive(Debug, Default)]
struct ReceiverCounters {
    received: AtomicU64,
    dispatched: AtomicU64,
    unknown_type: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ReceiverStats {
    pub received: u64,
    pub dispatched: u64,
    pub unknown_type: u64,
    pub dropped: u64,
}

/// Routes inbound buffers to per-message-type decode queues.
pub struct Receiver {
    handlers: RwLock<AHashMap<MessageType, BufferQueue>>,
    buffers: RecordPool<RecvBuffer>,
    counters: ReceiverCounters,
}

impl Receiver {
    pub fn new(buffer_pool_size: usize) -> Self {
        Self {
            handlers: RwLock::new(AHashMap::new()),
            buffers: RecordPool::new(buffer_pool_size),
            counters: ReceiverCounters::default(),
        }
    }

    /// Pool the queue release callbacks return buffers to.
    pub fn buffer_pool(&self) -> &RecordPool<RecvBuffer> {
        &self.buffers
    }

    /// Route buffers of `msg_type` to `queues`. One handler per type.
    pub fn register_handler(&self, msg_type: MessageType, queues: BufferQueue) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&msg_type) {
            return Err(IngestError::config(format!(
                "handler for message type {} already registered",
                msg_type
            )));
        }
        tracing::debug!(
            message_type = %msg_type,
            partitions = queues.partitions(),
            "registered receiver handler"
        );
        handlers.insert(msg_type, queues);
        Ok(())
    }

    /// Drop the handler of `msg_type`, disconnecting its decoders.
    pub fn unregister_handler(&self, msg_type: MessageType) -> bool {
        let removed = self.handlers.write().remove(&msg_type).is_some();
        if removed {
            tracing::debug!(message_type = %msg_type, "unregistered receiver handler");
        }
        removed
    }

    pub fn acquire_buffer(&self) -> Pooled<RecvBuffer> {
        self.buffers.acquire()
    }

    /// Queue `buffer` on the partition of its stream.
    ///
    /// Never blocks. Returns `false` when the buffer was dropped because
    /// no handler is registered or the partition is full.
    pub fn dispatch(&self, buffer: Pooled<RecvBuffer>) -> bool {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let handlers = self.handlers.read();
        let Some(queues) = handlers.get(&buffer.message_type) else {
            self.counters.unknown_type.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let partition = usize::from(buffer.vtap_id) % queues.partitions();
        if queues.put(partition, buffer) {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Copy `payload` into a pooled buffer and dispatch it.
    pub fn ingest(&self, msg_type: MessageType, vtap_id: u16, payload: &[u8]) -> bool {
        let mut buffer = self.acquire_buffer();
        buffer.message_type = msg_type;
        buffer.vtap_id = vtap_id;
        buffer.payload.extend_from_slice(payload);
        buffer.received_at = Utc::now();
        self.dispatch(buffer)
    }

    /// Drop every registered queue writer so decoders drain and exit.
    pub fn close(&self) {
        let closed = {
            let mut handlers = self.handlers.write();
            let count = handlers.len();
            handlers.clear();
            count
        };
        tracing::info!(handlers = closed, "receiver closed");
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            received: self.counters.received.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            unknown_type: self.counters.unknown_type.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new(4_096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{new_queues, Fetch, QueueOption};
    use std::sync::Arc;
    use std::time::Duration;

    fn queues(count: usize, capacity: usize, receiver: &Receiver) -> crate::queue::QueueSet<Pooled<RecvBuffer>> {
        let pool = receiver.buffer_pool().clone();
        new_queues(
            "1-receive-to-decode-l7",
            capacity,
            count,
            1,
            vec![
                QueueOption::FlushIndicator(Duration::from_millis(10)),
                QueueOption::Release(Arc::new(move |b| pool.release(b))),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_partition_affinity() {
        let receiver = Receiver::new(16);
        let set = queues(4, 16, &receiver);
        receiver
            .register_handler(MessageType::ProtocolLog, set.writer)
            .unwrap();

        for _ in 0..3 {
            assert!(receiver.ingest(MessageType::ProtocolLog, 6, b"{}"));
        }

        let mut out = Vec::new();
        for (index, reader) in set.readers.iter().enumerate() {
            let fetched = reader.fetch(&mut out, 16);
            if index == 6 % 4 {
                assert_eq!(fetched, Fetch::Items(3));
            } else {
                assert_eq!(fetched, Fetch::FlushTick);
            }
        }
        assert!(out.iter().all(|b| b.vtap_id == 6 && &b.payload[..] == b"{}"));
    }

    #[test]
    fn test_unknown_type_dropped() {
        let receiver = Receiver::new(4);
        assert!(!receiver.ingest(MessageType::Profile, 1, b"{}"));
        let stats = receiver.stats();
        assert_eq!(stats.unknown_type, 1);
        // the buffer went straight back to the pool
        assert_eq!(receiver.buffer_pool().stats().returns, 1);
    }

    #[test]
    fn test_full_partition_dropped_and_released() {
        let receiver = Receiver::new(4);
        let set = queues(1, 1, &receiver);
        receiver
            .register_handler(MessageType::ProtocolLog, set.writer)
            .unwrap();

        assert!(receiver.ingest(MessageType::ProtocolLog, 1, b"a"));
        assert!(!receiver.ingest(MessageType::ProtocolLog, 1, b"b"));
        assert_eq!(receiver.stats().dropped, 1);
        assert_eq!(set.monitor.stats().overflow, 1);
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let receiver = Receiver::new(4);
        let a = queues(1, 1, &receiver);
        let b = queues(1, 1, &receiver);
        receiver.register_handler(MessageType::TaggedFlow, a.writer).unwrap();
        assert!(receiver.register_handler(MessageType::TaggedFlow, b.writer).is_err());
    }

    #[test]
    fn test_unregister_frees_message_type() {
        let receiver = Receiver::new(4);
        let first = queues(1, 4, &receiver);
        receiver.register_handler(MessageType::TaggedFlow, first.writer).unwrap();

        assert!(receiver.unregister_handler(MessageType::TaggedFlow));
        assert!(!receiver.unregister_handler(MessageType::TaggedFlow));
        let mut out = Vec::new();
        assert_eq!(first.readers[0].fetch(&mut out, 8), Fetch::Closed);
        assert!(!receiver.ingest(MessageType::TaggedFlow, 1, b"{}"));
        assert_eq!(receiver.stats().unknown_type, 1);

        let second = queues(1, 4, &receiver);
        assert!(receiver.register_handler(MessageType::TaggedFlow, second.writer).is_ok());
    }

    #[test]
    fn test_close_disconnects_decoders() {
        let receiver = Receiver::new(4);
        let set = queues(1, 4, &receiver);
        receiver.register_handler(MessageType::TaggedFlow, set.writer).unwrap();
        receiver.close();

        let mut out = Vec::new();
        assert_eq!(set.readers[0].fetch(&mut out, 8), Fetch::Closed);
    }
}
