//! Batching writer between the throttlers and the storage sink.
//!
//! [`FlowLogWriter`] owns one [`BatchWriter`] per table. Decoders hand rows
//! over without blocking; each batch writer collects them on a tokio task
//! and flushes to the [`Sink`] when the batch is full or the flush timeout
//! expires, whichever comes first.

pub mod batch;
pub mod sink;

pub use batch::{BatchWriter, WriterCounters, WriterStats};
pub use sink::{JsonLinesSink, MemorySink, Sink};

use crate::core::config::{ColdMedium, Config, WriterConfig};
use crate::core::retry::RetryConfig;
use crate::core::{FlowLogId, IngestError, Result, FLOW_TAG_DB};
use crate::flow_tag::{FlowTag, FLOW_TAG_TABLE};
use crate::record::{FlowLogRecord, PacketSequenceRecord, Poolable, Pooled, ProfileRecord};
use serde::Serialize;
use std::sync::Arc;

/// A row the batch writers can serialize.
pub trait Row: Poolable + Serialize + Sync {}

impl<T: Poolable + Serialize + Sync> Row for T {}

/// Accepts rows for a flow kind without blocking.
pub trait Writer<R: Row>: Send + Sync {
    /// Hand `row` over for writing. Returns `false` when it was dropped.
    fn write(&self, flow_log_id: FlowLogId, row: Pooled<R>) -> bool;
}

/// Cold storage tier of a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColdStorageSpec {
    pub medium: ColdMedium,
    pub name: String,
    pub ttl_hours: u32,
}

/// Where and how one table is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSpec {
    pub database: String,
    pub table: String,
    pub ttl_hours: u32,
    /// Partition granularity of the time column
    pub partition: &'static str,
    pub time_key: &'static str,
    pub storage_policy: String,
    pub cluster: String,
    pub time_zone: String,
    pub cold_storage: Option<ColdStorageSpec>,
}

impl TableSpec {
    fn new(database: &str, table: &str, ttl_hours: u32, partition: &'static str, config: &Config) -> Self {
        let cold = &config.cold_storage;
        Self {
            database: database.to_string(),
            table: table.to_string(),
            ttl_hours,
            partition,
            time_key: "time",
            storage_policy: config.writer.storage_policy.clone(),
            cluster: config.writer.cluster_name.clone(),
            time_zone: config.writer.time_zone.clone(),
            cold_storage: cold.enabled.then(|| ColdStorageSpec {
                medium: cold.medium,
                name: cold.name.clone(),
                ttl_hours: cold.ttl_hours,
            }),
        }
    }

    pub fn for_flow_log(id: FlowLogId, config: &Config) -> Self {
        let partition = match id {
            FlowLogId::InProcessProfile => "twelve_hour",
            _ => "hour",
        };
        Self::new(id.database(), id.table_name(), config.ttl_hours(id), partition, config)
    }

    pub fn for_flow_tag(config: &Config) -> Self {
        Self::new(FLOW_TAG_DB, FLOW_TAG_TABLE, config.ttl.flow_tag, "day", config)
    }

    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// Writer shared by every logger of the flow log service.
pub struct FlowLogWriter {
    l4: BatchWriter<FlowLogRecord>,
    l7: BatchWriter<FlowLogRecord>,
    packet: BatchWriter<PacketSequenceRecord>,
    profile: BatchWriter<ProfileRecord>,
    flow_tag: BatchWriter<FlowTag>,
}

impl FlowLogWriter {
    /// Spawn one batch writer per table on the current tokio runtime.
    pub fn new(config: &Config, sink: Arc<dyn Sink>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| IngestError::runtime("flow log writer requires a running tokio runtime"))?;

        let writer = &config.writer;
        let retry = RetryConfig::from(&writer.retry);
        let flow_log_writer = Self {
            l4: spawn(&runtime, TableSpec::for_flow_log(FlowLogId::L4Flow, config), &sink, writer, &retry),
            l7: spawn(&runtime, TableSpec::for_flow_log(FlowLogId::L7Flow, config), &sink, writer, &retry),
            packet: spawn(&runtime, TableSpec::for_flow_log(FlowLogId::L4Packet, config), &sink, writer, &retry),
            profile: spawn(
                &runtime,
                TableSpec::for_flow_log(FlowLogId::InProcessProfile, config),
                &sink,
                writer,
                &retry,
            ),
            flow_tag: spawn(&runtime, TableSpec::for_flow_tag(config), &sink, writer, &retry),
        };
        tracing::info!(
            sink = sink.name(),
            addrs = ?writer.addrs,
            batch_size = writer.batch_size,
            flush_timeout = ?writer.flush_timeout,
            "flow log writer started"
        );
        Ok(flow_log_writer)
    }

    /// Flush every table and wait until the sink has taken the rows.
    pub async fn flush(&self) {
        self.l4.flush().await;
        self.l7.flush().await;
        self.packet.flush().await;
        self.profile.flush().await;
        self.flow_tag.flush().await;
    }

    /// Flush what is pending and stop every batch writer.
    pub async fn close(&self) {
        self.l4.close().await;
        self.l7.close().await;
        self.packet.close().await;
        self.profile.close().await;
        self.flow_tag.close().await;
        tracing::info!("flow log writer closed");
    }

    pub fn stats(&self) -> Vec<WriterStats> {
        vec![
            self.l4.stats(),
            self.l7.stats(),
            self.packet.stats(),
            self.profile.stats(),
            self.flow_tag.stats(),
        ]
    }
}

fn spawn<R: Row>(
    runtime: &tokio::runtime::Handle,
    table: TableSpec,
    sink: &Arc<dyn Sink>,
    writer: &WriterConfig,
    retry: &RetryConfig,
) -> BatchWriter<R> {
    BatchWriter::spawn(
        runtime,
        table,
        Arc::clone(sink),
        writer.batch_size,
        writer.flush_timeout,
        writer.channel_capacity,
        retry.clone(),
    )
}

fn misrouted(flow_log_id: FlowLogId, row_type: &str) -> bool {
    tracing::debug!(%flow_log_id, row_type, "dropping row routed to the wrong table");
    false
}

impl Writer<FlowLogRecord> for FlowLogWriter {
    fn write(&self, flow_log_id: FlowLogId, row: Pooled<FlowLogRecord>) -> bool {
        match flow_log_id {
            FlowLogId::L4Flow => self.l4.send(row),
            FlowLogId::L7Flow => self.l7.send(row),
            other => misrouted(other, "flow_log"),
        }
    }
}

impl Writer<PacketSequenceRecord> for FlowLogWriter {
    fn write(&self, flow_log_id: FlowLogId, row: Pooled<PacketSequenceRecord>) -> bool {
        match flow_log_id {
            FlowLogId::L4Packet => self.packet.send(row),
            other => misrouted(other, "l4_packet"),
        }
    }
}

impl Writer<ProfileRecord> for FlowLogWriter {
    fn write(&self, flow_log_id: FlowLogId, row: Pooled<ProfileRecord>) -> bool {
        match flow_log_id {
            FlowLogId::InProcessProfile => self.profile.send(row),
            other => misrouted(other, "profile"),
        }
    }
}

/// Flow tags of every source table share one destination table.
impl Writer<FlowTag> for FlowLogWriter {
    fn write(&self, _source: FlowLogId, row: Pooled<FlowTag>) -> bool {
        self.flow_tag.send(row)
    }
}
