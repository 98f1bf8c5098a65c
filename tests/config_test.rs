//! Configuration system tests.

use ingester_lib::core::config::{ColdMedium, LogLevel};
use ingester_lib::core::{Config, ConfigBuilder, IngestError, MessageType};
use ingester_lib::platform::PlatformSnapshot;
use std::net::Ipv4Addr;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.ingester.decoder_queue_count, 2);
    assert_eq!(config.ingester.throttle, 50_000);
    assert_eq!(config.ingester.throttle_window, Duration::from_secs(1));
    assert_eq!(config.writer.batch_size, 10_000);
    assert!(config.flow_tag.enabled);
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .decoder_queue_count(8)
        .decoder_queue_size(4096)
        .throttle(8000)
        .flush_indicator_interval(Duration::from_millis(500))
        .storage_addrs(vec!["ck:9000".to_string()])
        .debug(true)
        .build()
        .unwrap();

    assert_eq!(config.ingester.decoder_queue_count, 8);
    assert_eq!(config.ingester.decoder_queue_size, 4096);
    assert_eq!(config.partition_throttle(MessageType::ProtocolLog), 1000);
    assert_eq!(config.writer.addrs, vec!["ck:9000".to_string()]);
    assert!(config.debug);
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
ingester:
  decoder_queue_count: 4
  decoder_queue_size: 2048
  throttle: 40000
  l7_throttle: 8000
  flush_indicator_interval: 2s
writer:
  addrs: ["ck-0:9000"]
  storage_policy: hot_cold
  time_zone: Asia/Shanghai
  flush_timeout: 5s
  retry:
    max_attempts: 5
    initial_backoff: 50ms
cold_storage:
  enabled: true
  medium: volume
  name: cold-vol
  ttl_hours: 12
flow_tag:
  cache_size: 5000
  cache_flush_timeout: 10m
platform:
  refresh_interval: 30s
logging:
  level: debug
  structured: true
"#;

    let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

    assert_eq!(config.ingester.decoder_queue_count, 4);
    assert_eq!(config.partition_throttle(MessageType::TaggedFlow), 10_000);
    assert_eq!(config.partition_throttle(MessageType::ProtocolLog), 2_000);
    assert_eq!(config.partition_throttle(MessageType::OpenTelemetry), 10_000);
    assert_eq!(config.writer.storage_policy, "hot_cold");
    assert_eq!(config.writer.retry.max_attempts, 5);
    assert_eq!(config.writer.retry.initial_backoff, Duration::from_millis(50));
    assert_eq!(config.cold_storage.medium, ColdMedium::Volume);
    assert_eq!(config.flow_tag.cache_flush_timeout, Duration::from_secs(600));
    assert_eq!(config.platform.refresh_interval, Duration::from_secs(30));
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert!(config.logging.structured);
}

#[test]
fn test_invalid_yaml_is_a_config_error() {
    let result = ConfigBuilder::new().from_yaml("ingester: [not, a, map]");
    assert!(matches!(result, Err(IngestError::Config(_))));
}

#[test]
fn test_validation_rules() {
    let cases: Vec<(&str, fn(&mut Config))> = vec![
        ("zero partitions", |c| c.ingester.decoder_queue_count = 0),
        ("zero queue size", |c| c.ingester.decoder_queue_size = 0),
        ("zero window", |c| c.ingester.throttle_window = Duration::ZERO),
        ("zero batch", |c| c.writer.batch_size = 0),
        ("no endpoints", |c| c.writer.addrs.clear()),
        ("zero ttl", |c| c.ttl.profile = 0),
        ("unnamed cold storage", |c| c.cold_storage.enabled = true),
        ("empty tag cache", |c| c.flow_tag.cache_size = 0),
        ("sub-second tag flush", |c| c.flow_tag.cache_flush_timeout = Duration::from_millis(200)),
        ("throttle below partitions", |c| {
            c.ingester.decoder_queue_count = 16;
            c.ingester.throttle = 8;
        }),
    ];

    for (name, mutate) in cases {
        let mut config = Config::default();
        mutate(&mut config);
        assert!(config.validate().is_err(), "{} should be rejected", name);
    }
}

#[test]
fn test_platform_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("platform.yaml");
    std::fs::write(
        &path,
        r#"
agents:
  - vtap_id: 3
    epc_id: 12
resources:
  - epc_id: 12
    ip: 10.0.0.1
    pod_id: 77
    pod_group_id: 5
services:
  - service_id: 900
    pod_group_id: 5
"#,
    )
    .unwrap();

    let snapshot = PlatformSnapshot::from_file(&path, 4).unwrap();
    assert_eq!(snapshot.version(), 4);
    assert_eq!(snapshot.agent(3).unwrap().epc_id, 12);
    let info = snapshot.ipv4(12, Ipv4Addr::new(10, 0, 0, 1)).unwrap();
    assert_eq!(info.pod_id, 77);
    assert_eq!(snapshot.resource_count(), 1);

    let missing = dir.path().join("missing.json");
    assert!(PlatformSnapshot::from_file(&missing, 1).is_err());
}
