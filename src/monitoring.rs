//! Pipeline stats and the periodic stats reporter.
//!
//! Every stage keeps atomic counters; a [`StatsSource`] collects them into
//! one [`PipelineStats`] snapshot, and the [`StatsReporter`] logs a summary
//! of it on an interval together with an overall [`SystemHealth`].

use crate::flow_log::LoggerStats;
use crate::platform::PlatformTableStats;
use crate::record::PoolStats;
use crate::writer::WriterStats;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;

/// System health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    /// Nothing is being lost.
    Healthy,
    /// Some records are throttled or dropped.
    Degraded,
    /// A significant share of records is lost.
    Unhealthy,
    /// Batches are failing to reach storage.
    Critical,
}

impl SystemHealth {
    /// Get severity score (0-100).
    pub fn severity(&self) -> u8 {
        match self {
            SystemHealth::Healthy => 0,
            SystemHealth::Degraded => 25,
            SystemHealth::Unhealthy => 75,
            SystemHealth::Critical => 100,
        }
    }

    fn from_severity(severity: u8) -> Self {
        match severity {
            0..=10 => SystemHealth::Healthy,
            11..=40 => SystemHealth::Degraded,
            41..=80 => SystemHealth::Unhealthy,
            _ => SystemHealth::Critical,
        }
    }
}

/// Stats of one record pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSummary {
    pub name: &'static str,
    pub stats: PoolStats,
}

/// Snapshot of every counter in the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub loggers: Vec<LoggerStats>,
    pub writers: Vec<WriterStats>,
    pub pools: Vec<PoolSummary>,
    pub platform_tables: Vec<PlatformTableStats>,
}

impl PipelineStats {
    pub fn logger(&self, name: &str) -> Option<&LoggerStats> {
        self.loggers.iter().find(|l| l.name == name)
    }

    pub fn writer(&self, table: &str) -> Option<&WriterStats> {
        self.writers.iter().find(|w| w.table == table)
    }

    /// Buffers and records that never reached a batch: queue overflow,
    /// throttle drops and writer channel drops.
    pub fn lost(&self) -> u64 {
        let loggers: u64 = self
            .loggers
            .iter()
            .map(|l| l.queue.overflow + l.throttle.dropped)
            .sum();
        let writers: u64 = self.writers.iter().map(|w| w.dropped).sum();
        loggers + writers
    }

    pub fn arrivals(&self) -> u64 {
        self.loggers.iter().map(|l| l.queue.put + l.queue.overflow).sum()
    }
}

/// Anything able to produce a [`PipelineStats`] snapshot.
pub trait StatsSource: Send + Sync {
    fn collect(&self) -> PipelineStats;
}

/// Loss ratios at which the pipeline is reported as degraded.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Lost / arrivals above which health is degraded.
    pub degraded_loss: f64,
    /// Lost / arrivals above which health is unhealthy.
    pub unhealthy_loss: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_loss: 0.01,
            unhealthy_loss: 0.10,
        }
    }
}

/// Determine overall health from one snapshot.
pub fn determine_health(stats: &PipelineStats, thresholds: &HealthThresholds) -> SystemHealth {
    let mut severity = 0u8;

    if stats.writers.iter().any(|w| w.failed_batches > 0) {
        severity = severity.max(100);
    }

    let arrivals = stats.arrivals();
    if arrivals > 0 {
        let loss = stats.lost() as f64 / arrivals as f64;
        if loss > thresholds.unhealthy_loss {
            severity = severity.max(75);
        } else if loss > thresholds.degraded_loss {
            severity = severity.max(25);
        }
    }

    SystemHealth::from_severity(severity)
}

/// Logs a pipeline summary every interval until stopped.
pub struct StatsReporter {
    source: Arc<dyn StatsSource>,
    interval: Duration,
    thresholds: HealthThresholds,
    shutdown: Arc<AtomicBool>,
}

impl StatsReporter {
    pub fn new(source: Arc<dyn StatsSource>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            thresholds: HealthThresholds::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Spawn the reporting loop on the current runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let shutdown = Arc::clone(&self.shutdown);
        let thresholds = self.thresholds.clone();
        let period = self.interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            while !shutdown.load(Ordering::Relaxed) {
                interval.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                report(&source.collect(), &thresholds);
            }
        })
    }

    /// Log one summary now.
    pub fn report_now(&self) -> SystemHealth {
        report(&self.source.collect(), &self.thresholds)
    }

    /// Stop monitoring.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn report(stats: &PipelineStats, thresholds: &HealthThresholds) -> SystemHealth {
    let health = determine_health(stats, thresholds);

    for logger in &stats.loggers {
        tracing::info!(
            logger = %logger.name,
            queued = logger.queue.put,
            overflow = logger.queue.overflow,
            decoded = logger.decoder.decoded,
            decode_errors = logger.decoder.decode_errors,
            admitted = logger.throttle.admitted,
            throttled = logger.throttle.dropped,
            flow_tags = logger.flow_tag.written,
            "logger stats"
        );
    }
    for writer in &stats.writers {
        tracing::info!(
            table = %writer.table,
            received = writer.received,
            written = writer.written,
            dropped = writer.dropped,
            failed_batches = writer.failed_batches,
            "writer stats"
        );
    }
    for pool in &stats.pools {
        tracing::debug!(
            pool = pool.name,
            hits = pool.stats.hits,
            misses = pool.stats.misses,
            available = pool.stats.available,
            "pool stats"
        );
    }

    match health {
        SystemHealth::Healthy => tracing::info!(?health, "pipeline health"),
        SystemHealth::Degraded => tracing::warn!(?health, lost = stats.lost(), "pipeline health"),
        SystemHealth::Unhealthy | SystemHealth::Critical => {
            tracing::error!(?health, lost = stats.lost(), "pipeline health")
        },
    }
    health
}
