//! One message type's pipeline: queue set, decoders and their bindings.

use crate::codec::{Codec, JsonCodec};
use crate::core::config::Config;
use crate::core::{MessageType, Result};
use crate::decoder::{Decoder, DecoderCounters, DecoderStats};
use crate::flow_tag::{FlowTag, FlowTagCounters, FlowTagStats, FlowTagWriter};
use crate::platform::{PlatformDataManager, PlatformInfoTable};
use crate::queue::{new_queues, QueueMonitor, QueueOption, QueueReader, QueueStats};
use crate::receiver::{BufferQueue, Receiver, RecvBuffer};
use crate::record::{Pooled, Record, RecordPool};
use crate::throttler::{ThrottleCounters, ThrottleStats, ThrottlingQueue};
use crate::writer::Writer;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Creates one codec per decoder.
pub type CodecFactory<I> = Box<dyn Fn() -> Box<dyn Codec<I>>>;

/// Lifecycle of a logger, independent of its record type.
pub trait Pipeline: Send {
    fn name(&self) -> &str;

    /// Start platform subscriptions and spawn one thread per decoder.
    fn start(&mut self) -> Result<()>;

    /// Stop platform subscriptions. Decoders keep running until their
    /// queue set is closed.
    fn close(&self);

    /// Wait for every decoder thread to exit.
    fn join(&mut self);

    /// Hand the queue set to `receiver`. Fails when the message type
    /// already has a handler.
    fn register(&mut self, receiver: &Receiver) -> Result<()>;

    /// Undo a construction that did not complete: drop the receiver
    /// handler this logger registered and its platform tables.
    fn discard(&mut self, receiver: &Receiver, platform: Option<&PlatformDataManager>);

    fn probe(&self) -> LoggerProbe;
}

/// Counter handles of one logger, readable from any thread.
#[derive(Clone)]
pub struct LoggerProbe {
    name: String,
    throttle_limit: usize,
    queue: QueueMonitor<Pooled<RecvBuffer>>,
    decoders: Vec<Arc<DecoderCounters>>,
    throttlers: Vec<Arc<ThrottleCounters>>,
    flow_tags: Vec<Arc<FlowTagCounters>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoggerStats {
    pub name: String,
    /// Per-partition admission limit
    pub throttle_limit: usize,
    pub queue: QueueStats,
    pub decoder: DecoderStats,
    pub throttle: ThrottleStats,
    pub flow_tag: FlowTagStats,
}

impl LoggerProbe {
    /// Counters summed over every partition.
    pub fn stats(&self) -> LoggerStats {
        let mut stats = LoggerStats {
            name: self.name.clone(),
            throttle_limit: self.throttle_limit,
            queue: self.queue.stats(),
            ..LoggerStats::default()
        };
        for decoder in self.decoders.iter().map(|c| c.snapshot()) {
            stats.decoder.raw_buffers += decoder.raw_buffers;
            stats.decoder.decoded += decoder.decoded;
            stats.decoder.decode_errors += decoder.decode_errors;
            stats.decoder.flush_ticks += decoder.flush_ticks;
        }
        for throttle in self.throttlers.iter().map(|c| c.snapshot()) {
            stats.throttle.arrivals += throttle.arrivals;
            stats.throttle.admitted += throttle.admitted;
            stats.throttle.dropped += throttle.dropped;
            stats.throttle.write_rejected += throttle.write_rejected;
        }
        for tags in self.flow_tags.iter().map(|c| c.snapshot()) {
            stats.flow_tag.seen += tags.seen;
            stats.flow_tag.cache_hits += tags.cache_hits;
            stats.flow_tag.written += tags.written;
        }
        stats
    }
}

/// Builder of a [`Logger`] for one message type.
pub struct LoggerBuilder<R: Record> {
    msg_type: MessageType,
    queue_name: String,
    throttle: Option<usize>,
    enrich: bool,
    write_tags: bool,
    codec: CodecFactory<R::Input>,
    pool: RecordPool<R>,
}

impl<R: Record> LoggerBuilder<R> {
    pub fn new(msg_type: MessageType, pool: RecordPool<R>) -> Self {
        Self {
            msg_type,
            queue_name: format!("1-receive-to-decode-{}", msg_type),
            throttle: None,
            enrich: true,
            write_tags: false,
            codec: Box::new(|| Box::new(JsonCodec::<R::Input>::new()) as Box<dyn Codec<R::Input>>),
            pool,
        }
    }

    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Total throttle of the message type; defaults to the configured one.
    pub fn throttle(mut self, throttle: usize) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }

    pub fn flow_tags(mut self, write_tags: bool) -> Self {
        self.write_tags = write_tags;
        self
    }

    pub fn codec<C, F>(mut self, factory: F) -> Self
    where
        C: Codec<R::Input> + 'static,
        F: Fn() -> C + 'static,
    {
        self.codec = Box::new(move || Box::new(factory()) as Box<dyn Codec<R::Input>>);
        self
    }

    /// Build the queue set, decoders and bindings. The queue set reaches
    /// `receiver` only through [`Pipeline::register`]; platform tables
    /// created before a failing step are removed again.
    pub fn build(
        self,
        config: &Config,
        receiver: &Receiver,
        platform: Option<&PlatformDataManager>,
        writer: Arc<dyn Writer<R>>,
        tag_writer: Option<(RecordPool<FlowTag>, Arc<dyn Writer<FlowTag>>)>,
    ) -> Result<Logger<R>> {
        let ingester = &config.ingester;
        let partitions = ingester.decoder_queue_count;
        let throttle = match self.throttle {
            Some(throttle) => throttle,
            None => config.partition_throttle(self.msg_type) * partitions,
        };

        let buffer_pool = receiver.buffer_pool().clone();
        let set = new_queues(
            self.queue_name.clone(),
            ingester.decoder_queue_size,
            partitions,
            1,
            vec![
                QueueOption::FlushIndicator(ingester.flush_indicator_interval),
                QueueOption::Release(Arc::new(move |buffer| buffer_pool.release(buffer))),
            ],
        )?;

        let mut decoders = Vec::with_capacity(partitions);
        let mut tables = Vec::new();
        let mut probe = LoggerProbe {
            name: self.msg_type.to_string(),
            throttle_limit: 0,
            queue: set.monitor.clone(),
            decoders: Vec::with_capacity(partitions),
            throttlers: Vec::with_capacity(partitions),
            flow_tags: Vec::new(),
        };

        for reader in set.readers {
            let partition = Partition {
                config,
                platform,
                throttle,
                writer: &writer,
                tag_writer: tag_writer.as_ref(),
            };
            match self.build_decoder(reader, partition, &mut tables, &mut probe) {
                Ok(decoder) => decoders.push(decoder),
                Err(e) => {
                    remove_tables(platform, &tables);
                    return Err(e);
                },
            }
        }

        tracing::info!(
            message_type = %self.msg_type,
            queue = %self.queue_name,
            partitions,
            throttle_per_partition = probe.throttle_limit,
            enrich = self.enrich,
            flow_tags = !probe.flow_tags.is_empty(),
            "logger built"
        );

        Ok(Logger {
            msg_type: self.msg_type,
            handler: Some(set.writer),
            registered: false,
            decoders,
            tables,
            threads: Vec::new(),
            probe,
        })
    }

    fn build_decoder(
        &self,
        reader: QueueReader<Pooled<RecvBuffer>>,
        partition: Partition<'_, R>,
        tables: &mut Vec<Arc<PlatformInfoTable>>,
        probe: &mut LoggerProbe,
    ) -> Result<Decoder<R>> {
        let config = partition.config;
        let index = reader.index();
        let name = format!("{}-{}", self.msg_type, index);

        let table = match (self.enrich, partition.platform) {
            (true, Some(manager)) => {
                let table = manager.new_table(name.clone())?;
                tables.push(Arc::clone(&table));
                Some(table)
            },
            _ => None,
        };

        let flow_tags = match (partition.tag_writer, self.write_tags && config.flow_tag.enabled) {
            (Some((pool, tags)), true) => {
                let flow_tags = FlowTagWriter::new(name.clone(), &config.flow_tag, pool.clone(), Arc::clone(tags))?;
                probe.flow_tags.push(flow_tags.counters());
                Some(flow_tags)
            },
            _ => None,
        };

        let throttler = ThrottlingQueue::new(
            name,
            partition.throttle,
            config.ingester.decoder_queue_count,
            config.ingester.throttle_window,
            Arc::clone(partition.writer),
        )?;
        probe.throttle_limit = throttler.limit();
        probe.throttlers.push(throttler.counters());

        let decoder = Decoder::new(
            index,
            self.msg_type,
            reader,
            (self.codec)(),
            self.pool.clone(),
            table,
            throttler,
            flow_tags,
        );
        probe.decoders.push(decoder.counters());
        Ok(decoder)
    }
}

/// Shared inputs of every partition of one logger.
struct Partition<'a, R: Record> {
    config: &'a Config,
    platform: Option<&'a PlatformDataManager>,
    throttle: usize,
    writer: &'a Arc<dyn Writer<R>>,
    tag_writer: Option<&'a (RecordPool<FlowTag>, Arc<dyn Writer<FlowTag>>)>,
}

fn remove_tables(platform: Option<&PlatformDataManager>, tables: &[Arc<PlatformInfoTable>]) {
    if let Some(manager) = platform {
        for table in tables {
            manager.remove_table(table.name());
        }
    }
}

/// Decoders of one message type, bound to their platform tables.
pub struct Logger<R: Record> {
    msg_type: MessageType,
    /// Queue set writer until it is handed to the receiver
    handler: Option<BufferQueue>,
    registered: bool,
    decoders: Vec<Decoder<R>>,
    tables: Vec<Arc<PlatformInfoTable>>,
    threads: Vec<JoinHandle<()>>,
    probe: LoggerProbe,
}

impl<R: Record> Logger<R> {
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }
}

impl<R: Record> Pipeline for Logger<R> {
    fn name(&self) -> &str {
        self.msg_type.as_str()
    }

    fn start(&mut self) -> Result<()> {
        for table in &self.tables {
            table.start();
        }
        for decoder in self.decoders.drain(..) {
            let thread_name = format!("decoder-{}-{}", self.msg_type, decoder.index());
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || decoder.run())?;
            self.threads.push(handle);
        }
        tracing::info!(message_type = %self.msg_type, decoders = self.threads.len(), "logger started");
        Ok(())
    }

    fn close(&self) {
        for table in &self.tables {
            table.close();
        }
        tracing::info!(message_type = %self.msg_type, "logger closed");
    }

    fn join(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!(message_type = %self.msg_type, "decoder thread panicked");
            }
        }
    }

    fn register(&mut self, receiver: &Receiver) -> Result<()> {
        if let Some(handler) = self.handler.take() {
            receiver.register_handler(self.msg_type, handler)?;
            self.registered = true;
        }
        Ok(())
    }

    fn discard(&mut self, receiver: &Receiver, platform: Option<&PlatformDataManager>) {
        if std::mem::take(&mut self.registered) {
            receiver.unregister_handler(self.msg_type);
        }
        self.handler = None;
        remove_tables(platform, &self.tables);
        self.tables.clear();
        tracing::debug!(message_type = %self.msg_type, "logger discarded");
    }

    fn probe(&self) -> LoggerProbe {
        self.probe.clone()
    }
}
