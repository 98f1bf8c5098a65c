//! Flow log service: every logger of the ingester sharing one writer.

pub mod logger;

pub use logger::{CodecFactory, Logger, LoggerBuilder, LoggerProbe, LoggerStats, Pipeline};

use crate::codec::{JsonCodec, Lz4JsonCodec};
use crate::core::config::Config;
use crate::core::{MessageType, Result};
use crate::flow_tag::FlowTag;
use crate::monitoring::{PipelineStats, PoolSummary, StatsSource};
use crate::platform::PlatformDataManager;
use crate::receiver::Receiver;
use crate::record::{
    FlowLogInput, FlowLogRecord, PacketSequenceRecord, ProfileRecord, RecordPool, RecordPools,
};
use crate::writer::{FlowLogWriter, Sink, Writer};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Loggers for all message types, the shared writer and their pools.
pub struct FlowLog {
    config: Config,
    loggers: Vec<Box<dyn Pipeline>>,
    writer: Arc<FlowLogWriter>,
    pools: RecordPools,
    flow_tag_pool: RecordPool<FlowTag>,
    platform: Option<Arc<PlatformDataManager>>,
    refresher: Option<JoinHandle<()>>,
    runtime: tokio::runtime::Handle,
}

impl FlowLog {
    /// Build the writer and every logger, then register the loggers with
    /// `receiver`.
    ///
    /// Must be called inside a tokio runtime. Any failure aborts before a
    /// logger is started and leaves no handler registered with `receiver`
    /// and no table in `platform`.
    pub fn new(
        config: Config,
        receiver: &Receiver,
        platform: Option<Arc<PlatformDataManager>>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self> {
        let writer = Arc::new(FlowLogWriter::new(&config, sink)?);
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| crate::core::IngestError::runtime("flow log service requires a running tokio runtime"))?;

        let pools = RecordPools::new(config.ingester.record_pool_size);
        let flow_tag_pool = RecordPool::<FlowTag>::new(config.ingester.record_pool_size);
        let manager = platform.as_deref();

        let mut loggers: Vec<Box<dyn Pipeline>> = Vec::with_capacity(MessageType::ALL.len());
        let built = build_loggers(&config, receiver, manager, &writer, &pools, &flow_tag_pool, &mut loggers)
            .and_then(|()| loggers.iter_mut().try_for_each(|logger| logger.register(receiver)));
        if let Err(e) = built {
            for logger in &mut loggers {
                logger.discard(receiver, manager);
            }
            tracing::error!("flow log service construction failed: {}", e);
            return Err(e);
        }

        tracing::info!(loggers = loggers.len(), enrich = manager.is_some(), "flow log service built");
        Ok(Self {
            config,
            loggers,
            writer,
            pools,
            flow_tag_pool,
            platform,
            refresher: None,
            runtime,
        })
    }

    pub fn writer(&self) -> &Arc<FlowLogWriter> {
        &self.writer
    }

    pub fn loggers(&self) -> impl Iterator<Item = &dyn Pipeline> {
        self.loggers.iter().map(|l| l.as_ref())
    }

    /// Start every logger, then the snapshot refresher if one is configured.
    pub fn start(&mut self) -> Result<()> {
        for logger in &mut self.loggers {
            logger.start()?;
        }

        if let (Some(manager), Some(path)) = (&self.platform, &self.config.platform.snapshot_path) {
            let _guard = self.runtime.enter();
            self.refresher =
                Some(manager.spawn_file_refresher(path.clone(), self.config.platform.refresh_interval));
        }
        tracing::info!("flow log service started");
        Ok(())
    }

    /// Stop platform subscriptions and the refresher. Decoders keep draining
    /// until the receiver is closed.
    pub fn close(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
        for logger in &self.loggers {
            logger.close();
        }
    }

    /// Close `receiver`, wait for every decoder to drain, then flush and stop
    /// the writer.
    pub async fn shutdown(&mut self, receiver: &Receiver) -> Result<()> {
        receiver.close();
        self.close();

        let mut loggers = std::mem::take(&mut self.loggers);
        let loggers = tokio::task::spawn_blocking(move || {
            for logger in &mut loggers {
                logger.join();
            }
            loggers
        })
        .await?;
        self.loggers = loggers;

        self.writer.close().await;
        tracing::info!("flow log service stopped");
        Ok(())
    }

    /// Handle the stats reporter reads from.
    pub fn stats_source(&self) -> Arc<dyn StatsSource> {
        Arc::new(ServiceStats {
            probes: self.loggers.iter().map(|l| l.probe()).collect(),
            writer: Arc::clone(&self.writer),
            pools: self.pools.clone(),
            flow_tag_pool: self.flow_tag_pool.clone(),
            platform: self.platform.as_ref().map(Arc::clone),
        })
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats_source().collect()
    }
}

/// Build one logger per message type into `loggers`, stopping at the
/// first failure so the caller can discard what was built.
fn build_loggers(
    config: &Config,
    receiver: &Receiver,
    manager: Option<&PlatformDataManager>,
    writer: &Arc<FlowLogWriter>,
    pools: &RecordPools,
    flow_tag_pool: &RecordPool<FlowTag>,
    loggers: &mut Vec<Box<dyn Pipeline>>,
) -> Result<()> {
    let tags = || {
        let tags: Arc<dyn Writer<FlowTag>> = Arc::clone(writer) as Arc<dyn Writer<FlowTag>>;
        Some((flow_tag_pool.clone(), tags))
    };
    let flow_logs: Arc<dyn Writer<FlowLogRecord>> = Arc::clone(writer) as Arc<dyn Writer<FlowLogRecord>>;
    let packets: Arc<dyn Writer<PacketSequenceRecord>> = Arc::clone(writer) as Arc<dyn Writer<PacketSequenceRecord>>;
    let profiles: Arc<dyn Writer<ProfileRecord>> = Arc::clone(writer) as Arc<dyn Writer<ProfileRecord>>;

    let l4 = LoggerBuilder::new(MessageType::TaggedFlow, pools.flow_log.clone()).build(
        config,
        receiver,
        manager,
        Arc::clone(&flow_logs),
        None,
    )?;
    loggers.push(Box::new(l4));

    let l7 = LoggerBuilder::new(MessageType::ProtocolLog, pools.flow_log.clone())
        .flow_tags(true)
        .build(config, receiver, manager, Arc::clone(&flow_logs), tags())?;
    loggers.push(Box::new(l7));

    let packet = LoggerBuilder::new(MessageType::PacketSequence, pools.packet.clone())
        .enrichment(false)
        .build(config, receiver, manager, packets, None)?;
    loggers.push(Box::new(packet));

    let otel = LoggerBuilder::new(MessageType::OpenTelemetry, pools.flow_log.clone())
        .codec(JsonCodec::<FlowLogInput>::new)
        .flow_tags(true)
        .build(config, receiver, manager, Arc::clone(&flow_logs), tags())?;
    loggers.push(Box::new(otel));

    let otel_compressed = LoggerBuilder::new(MessageType::OpenTelemetryCompressed, pools.flow_log.clone())
        .codec(Lz4JsonCodec::<FlowLogInput>::new)
        .flow_tags(true)
        .build(config, receiver, manager, flow_logs, tags())?;
    loggers.push(Box::new(otel_compressed));

    let profile = LoggerBuilder::new(MessageType::Profile, pools.profile.clone())
        .flow_tags(true)
        .build(config, receiver, manager, profiles, tags())?;
    loggers.push(Box::new(profile));

    Ok(())
}

struct ServiceStats {
    probes: Vec<LoggerProbe>,
    writer: Arc<FlowLogWriter>,
    pools: RecordPools,
    flow_tag_pool: RecordPool<FlowTag>,
    platform: Option<Arc<PlatformDataManager>>,
}

impl StatsSource for ServiceStats {
    fn collect(&self) -> PipelineStats {
        let mut pools: Vec<PoolSummary> = self
            .pools
            .stats()
            .into_iter()
            .map(|(name, stats)| PoolSummary { name, stats })
            .collect();
        pools.push(PoolSummary {
            name: "flow_tag",
            stats: self.flow_tag_pool.stats(),
        });

        PipelineStats {
            loggers: self.probes.iter().map(|p| p.stats()).collect(),
            writers: self.writer.stats(),
            pools,
            platform_tables: self
                .platform
                .as_ref()
                .map(|p| p.table_stats())
                .unwrap_or_default(),
        }
    }
}
