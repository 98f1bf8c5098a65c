//! Per-partition decode loop.
//!
//! A decoder drains one partition of a queue set: it decodes each buffer,
//! enriches and tags the resulting records, and hands them to its
//! throttling queue. It runs on a dedicated thread until the queue set is
//! closed.

use crate::codec::Codec;
use crate::core::MessageType;
use crate::flow_tag::FlowTagWriter;
use crate::platform::PlatformInfoTable;
use crate::queue::{Fetch, QueueReader};
use crate::receiver::RecvBuffer;
use crate::record::{FillContext, Pooled, Record, RecordPool};
use crate::throttler::ThrottlingQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Buffers taken from the queue per fetch.
pub const FETCH_BATCH: usize = 16;

#[derive(Debug, Default)]
pub struct DecoderCounters {
    pub raw_buffers: AtomicU64,
    pub decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub flush_ticks: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecoderStats {
    pub raw_buffers: u64,
    pub decoded: u64,
    pub decode_errors: u64,
    pub flush_ticks: u64,
}

impl DecoderCounters {
    pub fn snapshot(&self) -> DecoderStats {
        DecoderStats {
            raw_buffers: self.raw_buffers.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            flush_ticks: self.flush_ticks.load(Ordering::Relaxed),
        }
    }
}

pub struct Decoder<R: Record> {
    index: usize,
    msg_type: MessageType,
    reader: QueueReader<Pooled<RecvBuffer>>,
    codec: Box<dyn Codec<R::Input>>,
    pool: RecordPool<R>,
    platform: Option<Arc<PlatformInfoTable>>,
    throttler: ThrottlingQueue<R>,
    flow_tags: Option<FlowTagWriter>,
    counters: Arc<DecoderCounters>,
}

impl<R: Record> Decoder<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        msg_type: MessageType,
        reader: QueueReader<Pooled<RecvBuffer>>,
        codec: Box<dyn Codec<R::Input>>,
        pool: RecordPool<R>,
        platform: Option<Arc<PlatformInfoTable>>,
        throttler: ThrottlingQueue<R>,
        flow_tags: Option<FlowTagWriter>,
    ) -> Self {
        Self {
            index,
            msg_type,
            reader,
            codec,
            pool,
            platform,
            throttler,
            flow_tags,
            counters: Arc::new(DecoderCounters::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn counters(&self) -> Arc<DecoderCounters> {
        Arc::clone(&self.counters)
    }

    /// Fetch, decode and forward until the queue is closed.
    pub fn run(mut self) {
        tracing::info!(message_type = %self.msg_type, partition = self.index, "decoder started");

        let mut buffers = Vec::with_capacity(FETCH_BATCH);
        let mut inputs = Vec::new();
        let mut records = Vec::new();
        loop {
            match self.reader.fetch(&mut buffers, FETCH_BATCH) {
                Fetch::Closed => break,
                Fetch::FlushTick => {
                    self.counters.flush_ticks.fetch_add(1, Ordering::Relaxed);
                    self.throttler.tick();
                },
                Fetch::Items(_) => {
                    for buffer in buffers.drain(..) {
                        self.handle(&buffer, &mut inputs, &mut records);
                        self.reader.release(buffer);
                    }
                },
            }
        }

        tracing::info!(
            message_type = %self.msg_type,
            partition = self.index,
            decoded = self.counters.decoded.load(Ordering::Relaxed),
            "decoder stopped"
        );
    }

    fn handle(
        &mut self,
        buffer: &RecvBuffer,
        inputs: &mut Vec<R::Input>,
        records: &mut Vec<Pooled<R>>,
    ) {
        self.counters.raw_buffers.fetch_add(1, Ordering::Relaxed);

        inputs.clear();
        if let Err(e) = self.codec.decode(buffer, inputs) {
            self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                message_type = %self.msg_type,
                partition = self.index,
                vtap_id = buffer.vtap_id,
                "discarding undecodable buffer: {}",
                e
            );
            return;
        }

        let ctx = FillContext::new(self.msg_type, buffer.vtap_id, buffer.received_at);
        for input in inputs.drain(..) {
            R::decode_into(input, &ctx, &self.pool, records);
        }

        for mut record in records.drain(..) {
            self.counters.decoded.fetch_add(1, Ordering::Relaxed);
            if let Some(platform) = &self.platform {
                record.enrich(&**platform);
            }
            record.append_well_known_tags();
            debug_assert_eq!(record.tags().names().len(), record.tags().values().len());

            let flow_log_id = record.flow_log_id();
            match &mut self.flow_tags {
                Some(flow_tags) => {
                    if let Some(record) = self.throttler.admit(record) {
                        flow_tags.write_record(&*record);
                        self.throttler.forward(flow_log_id, record);
                    }
                },
                None => {
                    self.throttler.send(flow_log_id, record);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::core::FlowLogId;
    use crate::platform::{AgentView, PlatformDataManager, PlatformSnapshot};
    use crate::queue::{new_queues, QueueOption};
    use crate::record::FlowLogRecord;
    use crate::writer::Writer;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(FlowLogId, u16, i32)>>);

    impl Writer<FlowLogRecord> for Collect {
        fn write(&self, id: FlowLogId, row: Pooled<FlowLogRecord>) -> bool {
            self.0
                .lock()
                .push((id, row.universal.vtap_id, row.universal.l3_epc_id));
            true
        }
    }

    #[test]
    fn test_decodes_until_closed() {
        let buffers = RecordPool::<RecvBuffer>::new(8);
        let release = buffers.clone();
        let set = new_queues(
            "1-receive-to-decode-l4",
            8,
            1,
            1,
            vec![
                QueueOption::FlushIndicator(Duration::from_millis(10)),
                QueueOption::Release(Arc::new(move |b| release.release(b))),
            ],
        )
        .unwrap();

        let manager = PlatformDataManager::new(
            PlatformSnapshot::builder(1)
                .agent(3, AgentView { epc_id: 12, ..Default::default() })
                .build(),
        );
        let table = manager.new_table("l4-0").unwrap();
        table.start();

        let collect = Arc::new(Collect::default());
        let writer: Arc<dyn Writer<FlowLogRecord>> = Arc::clone(&collect) as Arc<dyn Writer<FlowLogRecord>>;
        let throttler = ThrottlingQueue::new("l4-0", 100, 1, Duration::from_secs(1), writer).unwrap();

        let mut readers = set.readers;
        let decoder = Decoder::<FlowLogRecord>::new(
            0,
            MessageType::TaggedFlow,
            readers.remove(0),
            Box::new(JsonCodec::new()),
            RecordPool::new(8),
            Some(table),
            throttler,
            None,
        );
        let counters = decoder.counters();

        for payload in [&br#"[{"flow_id": 1}, {"flow_id": 2}]"#[..], b"not json"] {
            let mut buffer = buffers.acquire();
            buffer.message_type = MessageType::TaggedFlow;
            buffer.vtap_id = 3;
            buffer.payload.extend_from_slice(payload);
            assert!(set.writer.put(0, buffer));
        }
        drop(set.writer);

        decoder.run();

        let stats = counters.snapshot();
        assert_eq!(stats.raw_buffers, 2);
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(
            *collect.0.lock(),
            vec![(FlowLogId::L4Flow, 3, 12), (FlowLogId::L4Flow, 3, 12)]
        );
        // both buffers were released back to the receive pool
        assert_eq!(buffers.stats().returns, 2);
    }
}
