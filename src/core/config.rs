//! Configuration management for the ingester.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults

use crate::core::{FlowLogId, IngestError, MessageType, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for the ingester
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decode pipeline configuration
    pub ingester: IngesterConfig,
    /// Columnar writer configuration
    pub writer: WriterConfig,
    /// Per-table retention
    pub ttl: TtlConfig,
    /// Cold storage tier
    pub cold_storage: ColdStorageConfig,
    /// Flow tag writer configuration
    pub flow_tag: FlowTagConfig,
    /// Platform snapshot configuration
    pub platform: PlatformConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Decode pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngesterConfig {
    /// Number of decode partitions per message type
    pub decoder_queue_count: usize,
    /// Capacity of each decode partition
    pub decoder_queue_size: usize,
    /// Flush tick handed to idle decoders
    #[serde(with = "humantime_serde")]
    pub flush_indicator_interval: Duration,
    /// Records admitted per throttle window, summed over all partitions
    pub throttle: usize,
    /// L4 flow log throttle override (0 = use `throttle`)
    pub l4_throttle: usize,
    /// L7 flow log throttle override (0 = use `throttle`)
    pub l7_throttle: usize,
    /// Profile throttle override (0 = use `throttle`)
    pub profile_throttle: usize,
    /// Length of one throttle window
    #[serde(with = "humantime_serde")]
    pub throttle_window: Duration,
    /// Free list capacity of each record pool
    pub record_pool_size: usize,
    /// Free list capacity of the receive buffer pool
    pub recv_buffer_pool_size: usize,
}

/// Columnar writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Storage endpoints
    pub addrs: Vec<String>,
    /// Storage user
    pub username: String,
    /// Storage password
    pub password: String,
    /// Cluster the tables are created on
    pub cluster_name: String,
    /// Storage policy of the tables
    pub storage_policy: String,
    /// Time zone used for partitioning
    pub time_zone: String,
    /// Rows per flushed batch
    pub batch_size: usize,
    /// Maximum age of a pending batch
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Duration,
    /// Rows buffered between decoders and one table writer
    pub channel_capacity: usize,
    /// Flush retry policy
    pub retry: RetrySettings,
}

/// Flush retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts per batch
    pub max_attempts: u32,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

/// Retention in hours per table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub l4_flow_log: u32,
    pub l7_flow_log: u32,
    pub l4_packet: u32,
    pub profile: u32,
    pub flow_tag: u32,
}

/// Cold storage tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColdStorageConfig {
    /// Move old parts to the cold tier
    pub enabled: bool,
    /// Cold medium type
    pub medium: ColdMedium,
    /// Disk or volume name
    pub name: String,
    /// Hours before parts move to the cold tier
    pub ttl_hours: u32,
}

/// Cold storage medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColdMedium {
    Disk,
    Volume,
}

/// Flow tag writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowTagConfig {
    /// Write tag names/values seen on records
    pub enabled: bool,
    /// Deduplication cache entries per decoder
    pub cache_size: usize,
    /// A cached tag is written again after this long
    #[serde(with = "humantime_serde")]
    pub cache_flush_timeout: Duration,
}

/// Platform snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Snapshot file reloaded by the refresher
    pub snapshot_path: Option<PathBuf>,
    /// Reload interval
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
    /// Interval of the pipeline stats summary (0 disables it)
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ingester: IngesterConfig::default(),
            writer: WriterConfig::default(),
            ttl: TtlConfig::default(),
            cold_storage: ColdStorageConfig::default(),
            flow_tag: FlowTagConfig::default(),
            platform: PlatformConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for IngesterConfig {
    fn default() -> Self {
        IngesterConfig {
            decoder_queue_count: 2,
            decoder_queue_size: 100_000,
            flush_indicator_interval: Duration::from_secs(3),
            throttle: 50_000,
            l4_throttle: 0,
            l7_throttle: 0,
            profile_throttle: 0,
            throttle_window: Duration::from_secs(1),
            record_pool_size: 16_384,
            recv_buffer_pool_size: 4_096,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            addrs: vec!["127.0.0.1:9000".to_string()],
            username: "default".to_string(),
            password: String::new(),
            cluster_name: "default".to_string(),
            storage_policy: "default".to_string(),
            time_zone: "UTC".to_string(),
            batch_size: 10_000,
            flush_timeout: Duration::from_secs(10),
            channel_capacity: 100_000,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        TtlConfig {
            l4_flow_log: 72,
            l7_flow_log: 72,
            l4_packet: 72,
            profile: 72,
            flow_tag: 72,
        }
    }
}

impl Default for ColdStorageConfig {
    fn default() -> Self {
        ColdStorageConfig {
            enabled: false,
            medium: ColdMedium::Disk,
            name: String::new(),
            ttl_hours: 24,
        }
    }
}

impl Default for FlowTagConfig {
    fn default() -> Self {
        FlowTagConfig {
            enabled: true,
            cache_size: 100_000,
            cache_flush_timeout: Duration::from_secs(1800),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            snapshot_path: None,
            refresh_interval: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let ingester = &self.ingester;
        if ingester.decoder_queue_count == 0 {
            return Err(IngestError::config("decoder_queue_count must be greater than 0"));
        }

        if ingester.decoder_queue_size == 0 {
            return Err(IngestError::config("decoder_queue_size must be greater than 0"));
        }

        if ingester.throttle_window.is_zero() {
            return Err(IngestError::config("throttle_window must be greater than 0"));
        }

        if ingester.flush_indicator_interval.is_zero() {
            return Err(IngestError::config("flush_indicator_interval must be greater than 0"));
        }

        // every partition must admit at least one record per window
        for throttle in [
            ingester.throttle,
            ingester.l4_throttle,
            ingester.l7_throttle,
            ingester.profile_throttle,
        ] {
            if throttle != 0 && throttle < ingester.decoder_queue_count {
                return Err(IngestError::InvalidThrottle {
                    throttle,
                    partitions: ingester.decoder_queue_count,
                });
            }
        }
        if ingester.throttle == 0 {
            return Err(IngestError::config("throttle must be greater than 0"));
        }

        if self.writer.addrs.is_empty() {
            return Err(IngestError::config("writer.addrs must list at least one endpoint"));
        }

        if self.writer.batch_size == 0 {
            return Err(IngestError::config("writer.batch_size must be greater than 0"));
        }

        if self.writer.channel_capacity == 0 {
            return Err(IngestError::config("writer.channel_capacity must be greater than 0"));
        }

        if self.writer.retry.max_attempts == 0 {
            return Err(IngestError::config("writer.retry.max_attempts must be greater than 0"));
        }

        let ttl = &self.ttl;
        for (table, hours) in [
            ("l4_flow_log", ttl.l4_flow_log),
            ("l7_flow_log", ttl.l7_flow_log),
            ("l4_packet", ttl.l4_packet),
            ("profile", ttl.profile),
            ("flow_tag", ttl.flow_tag),
        ] {
            if hours == 0 {
                return Err(IngestError::config(format!("ttl.{} must be greater than 0", table)));
            }
        }

        if self.platform.snapshot_path.is_some() && self.platform.refresh_interval.is_zero() {
            return Err(IngestError::config("platform.refresh_interval must be greater than 0"));
        }

        if self.cold_storage.enabled && self.cold_storage.name.is_empty() {
            return Err(IngestError::config("cold_storage.name is required when enabled"));
        }

        let flow_tag = &self.flow_tag;
        if flow_tag.enabled {
            if flow_tag.cache_size == 0 {
                return Err(IngestError::config("flow_tag.cache_size must be greater than 0"));
            }
            if flow_tag.cache_flush_timeout < Duration::from_secs(1) {
                return Err(IngestError::config(
                    "flow_tag.cache_flush_timeout must be at least one second",
                ));
            }
        }

        Ok(())
    }

    /// Per-window throttle of one partition of `msg_type`.
    ///
    /// The configured throttle is split evenly across partitions, whatever
    /// the traffic skew between them.
    pub fn partition_throttle(&self, msg_type: MessageType) -> usize {
        let ingester = &self.ingester;
        let configured = match msg_type {
            MessageType::TaggedFlow if ingester.l4_throttle != 0 => ingester.l4_throttle,
            MessageType::ProtocolLog if ingester.l7_throttle != 0 => ingester.l7_throttle,
            MessageType::Profile if ingester.profile_throttle != 0 => ingester.profile_throttle,
            _ => ingester.throttle,
        };
        configured / ingester.decoder_queue_count.max(1)
    }

    /// Retention in hours of the table `id` is written to.
    pub fn ttl_hours(&self, id: FlowLogId) -> u32 {
        match id {
            FlowLogId::L4Flow => self.ttl.l4_flow_log,
            FlowLogId::L7Flow => self.ttl.l7_flow_log,
            FlowLogId::L4Packet => self.ttl.l4_packet,
            FlowLogId::InProcessProfile => self.ttl.profile,
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| IngestError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set number of decode partitions
    pub fn decoder_queue_count(mut self, count: usize) -> Self {
        self.config.ingester.decoder_queue_count = count;
        self
    }

    /// Set decode partition capacity
    pub fn decoder_queue_size(mut self, size: usize) -> Self {
        self.config.ingester.decoder_queue_size = size;
        self
    }

    /// Set global throttle
    pub fn throttle(mut self, throttle: usize) -> Self {
        self.config.ingester.throttle = throttle;
        self
    }

    /// Set throttle window
    pub fn throttle_window(mut self, window: Duration) -> Self {
        self.config.ingester.throttle_window = window;
        self
    }

    /// Set flush tick interval
    pub fn flush_indicator_interval(mut self, interval: Duration) -> Self {
        self.config.ingester.flush_indicator_interval = interval;
        self
    }

    /// Set writer batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.writer.batch_size = size;
        self
    }

    /// Set writer flush timeout
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.flush_timeout = timeout;
        self
    }

    /// Set storage endpoints
    pub fn storage_addrs(mut self, addrs: Vec<String>) -> Self {
        self.config.writer.addrs = addrs;
        self
    }

    /// Enable or disable the flow tag writer
    pub fn flow_tag(mut self, enabled: bool) -> Self {
        self.config.flow_tag.enabled = enabled;
        self
    }

    /// Set platform snapshot file
    pub fn platform_snapshot(mut self, path: PathBuf) -> Self {
        self.config.platform.snapshot_path = Some(path);
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let mut config = Config::default();
        config.ingester.decoder_queue_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_throttle_smaller_than_partitions_rejected() {
        let mut config = Config::default();
        config.ingester.decoder_queue_count = 8;
        config.ingester.l7_throttle = 4;
        assert!(matches!(
            config.validate(),
            Err(IngestError::InvalidThrottle {
                throttle: 4,
                partitions: 8
            })
        ));
    }

    #[test]
    fn test_missing_storage_endpoints_rejected() {
        let mut config = Config::default();
        config.writer.addrs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partition_throttle_split() {
        let mut config = Config::default();
        config.ingester.decoder_queue_count = 4;
        config.ingester.throttle = 1000;
        config.ingester.l4_throttle = 400;

        assert_eq!(config.partition_throttle(MessageType::TaggedFlow), 100);
        assert_eq!(config.partition_throttle(MessageType::ProtocolLog), 250);
        assert_eq!(config.partition_throttle(MessageType::PacketSequence), 250);

        config.ingester.l7_throttle = 2000;
        assert_eq!(config.partition_throttle(MessageType::ProtocolLog), 500);
        assert_eq!(config.partition_throttle(MessageType::OpenTelemetry), 250);
    }

    #[test]
    fn test_otel_ignores_l7_throttle() {
        let mut config = Config::default();
        config.ingester.decoder_queue_count = 2;
        config.ingester.throttle = 1000;
        config.ingester.l7_throttle = 10;

        assert_eq!(config.partition_throttle(MessageType::ProtocolLog), 5);
        assert_eq!(config.partition_throttle(MessageType::OpenTelemetry), 500);
        assert_eq!(config.partition_throttle(MessageType::OpenTelemetryCompressed), 500);
    }

    #[test]
    fn test_flow_tag_cache_validated() {
        let mut config = Config::default();
        config.flow_tag.cache_size = 0;
        assert!(config.validate().is_err());

        config.flow_tag.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.flow_tag.cache_flush_timeout = Duration::from_millis(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .decoder_queue_count(4)
            .throttle(400)
            .batch_size(64)
            .flow_tag(false)
            .debug(true)
            .build()
            .unwrap();

        assert_eq!(config.ingester.decoder_queue_count, 4);
        assert_eq!(config.ingester.throttle, 400);
        assert_eq!(config.writer.batch_size, 64);
        assert!(!config.flow_tag.enabled);
        assert!(config.debug);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
ingester:
  decoder_queue_count: 3
  throttle: 3000
  throttle_window: 500ms
  flush_indicator_interval: 1s
writer:
  addrs: ["ck-0:9000", "ck-1:9000"]
  cluster_name: prod
  flush_timeout: 5s
ttl:
  l7_flow_log: 24
cold_storage:
  enabled: true
  medium: volume
  name: cold
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
        assert_eq!(config.ingester.decoder_queue_count, 3);
        assert_eq!(config.ingester.throttle_window, Duration::from_millis(500));
        assert_eq!(config.writer.addrs.len(), 2);
        assert_eq!(config.writer.cluster_name, "prod");
        assert_eq!(config.ttl.l7_flow_log, 24);
        assert_eq!(config.ttl.l4_flow_log, 72);
        assert_eq!(config.cold_storage.medium, ColdMedium::Volume);
        assert_eq!(config.ttl_hours(FlowLogId::L7Flow), 24);
    }
}
