//! Common test utilities and fixtures.

#![allow(dead_code)]

use ingester_lib::core::{Config, ConfigBuilder, MessageType};
use ingester_lib::flow_log::FlowLog;
use ingester_lib::platform::{AgentView, PlatformDataManager, PlatformSnapshot, ResourceInfo};
use ingester_lib::receiver::Receiver;
use ingester_lib::writer::{MemorySink, Sink};
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

pub const AGENT: u16 = 7;
pub const AGENT_EPC: i32 = 21;
pub const KNOWN_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 5));
pub const KNOWN_POD: u32 = 4242;
pub const KNOWN_SERVICE: u32 = 99;

/// Configuration with quick flushes, for pipelines that run to shutdown.
pub fn test_config(partitions: usize, throttle: usize) -> Config {
    ConfigBuilder::new()
        .decoder_queue_count(partitions)
        .decoder_queue_size(1024)
        .throttle(throttle)
        .throttle_window(Duration::from_secs(3600))
        .flush_indicator_interval(Duration::from_millis(20))
        .batch_size(64)
        .flush_timeout(Duration::from_millis(50))
        .build()
        .expect("test config is valid")
}

/// Snapshot knowing one agent and one pod address.
pub fn test_snapshot() -> PlatformSnapshot {
    PlatformSnapshot::builder(1)
        .agent(
            AGENT,
            AgentView {
                epc_id: AGENT_EPC,
                ..Default::default()
            },
        )
        .resource(
            AGENT_EPC,
            KNOWN_IP,
            ResourceInfo {
                pod_id: KNOWN_POD,
                pod_ns_id: 3,
                pod_group_id: 11,
                region_id: 1,
                ..Default::default()
            },
        )
        .pod_group_service(11, KNOWN_SERVICE)
        .build()
}

/// A started flow log service writing into a memory sink.
pub struct TestPipeline {
    pub receiver: Receiver,
    pub service: FlowLog,
    pub sink: Arc<MemorySink>,
}

impl TestPipeline {
    pub fn start(config: Config, platform: Option<PlatformSnapshot>) -> Self {
        let receiver = Receiver::new(256);
        let sink = Arc::new(MemorySink::new());
        let platform = platform.map(|s| Arc::new(PlatformDataManager::new(s)));
        let mut service = FlowLog::new(
            config,
            &receiver,
            platform,
            Arc::clone(&sink) as Arc<dyn Sink>,
        )
        .expect("service builds");
        service.start().expect("service starts");

        Self {
            receiver,
            service,
            sink,
        }
    }

    pub fn ingest(&self, msg_type: MessageType, vtap_id: u16, payload: &Value) -> bool {
        let bytes = serde_json::to_vec(payload).expect("payload serializes");
        self.receiver.ingest(msg_type, vtap_id, &bytes)
    }

    /// Close the receiver, drain the decoders and flush every table.
    pub async fn shutdown(&mut self) {
        self.service
            .shutdown(&self.receiver)
            .await
            .expect("service shuts down");
    }
}

/// An L7 flow log payload.
pub fn l7_flow(flow_id: u64, ip: IpAddr, attributes: &[(&str, &str)]) -> Value {
    let attributes: serde_json::Map<String, Value> = attributes
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    json!({
        "flow_id": flow_id,
        "start_time_us": 1_700_000_000_000_000i64,
        "end_time_us": 1_700_000_001_000_000i64,
        "ip": ip,
        "protocol": 6,
        "server_port": 8080,
        "l7_protocol": "HTTP",
        "request_type": "GET",
        "request_resource": "/api/orders",
        "response_code": 200,
        "span_name": "GET /api/orders",
        "app_service": "orders",
        "attributes": attributes,
    })
}

/// A batch of `count` L4 flow log payloads.
pub fn l4_flows(count: u64, ip: IpAddr) -> Value {
    Value::Array(
        (0..count)
            .map(|i| {
                json!({
                    "flow_id": i,
                    "start_time_us": 1_700_000_000_000_000i64,
                    "end_time_us": 1_700_000_001_000_000i64,
                    "ip": ip,
                    "protocol": 6,
                    "server_port": 443,
                })
            })
            .collect(),
    )
}
