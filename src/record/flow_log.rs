//! L4 and L7 flow log rows.

use super::{
    assign, id::FLOW_LOG_IDS, micros_to_secs, FillContext, IpUnion, Poolable, Pooled, Record,
    RecordPool, TagSet, UniversalTag,
};
use crate::core::{FlowLogId, MessageType};
use crate::platform::PlatformLookup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// One flow log as reported by an agent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FlowLogInput {
    pub flow_id: u64,
    pub start_time_us: i64,
    pub end_time_us: i64,
    pub ip: Option<IpAddr>,
    pub protocol: u8,
    pub server_port: u16,
    pub l7_protocol: String,
    pub request_type: String,
    pub request_domain: String,
    pub request_resource: String,
    pub response_code: Option<i32>,
    pub response_status: u8,
    pub trace_id: String,
    pub span_id: String,
    pub span_name: String,
    pub app_service: String,
    pub app_instance: String,
    /// Free-form attributes, stored as tags
    pub attributes: BTreeMap<String, String>,
}

/// Row of `flow_log.l4_flow_log` or `flow_log.l7_flow_log`.
#[derive(Debug, Default, Serialize)]
pub struct FlowLogRecord {
    pub time: u32,
    #[serde(rename = "_id")]
    pub id: u64,
    #[serde(skip)]
    pub msg_type: MessageType,
    pub flow_id: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub create_time: DateTime<Utc>,
    pub in_time: DateTime<Utc>,
    #[serde(flatten)]
    pub ip: IpUnion,
    pub protocol: u8,
    pub server_port: u16,
    pub l7_protocol: String,
    pub request_type: String,
    pub request_domain: String,
    pub request_resource: String,
    pub response_code: Option<i32>,
    pub response_status: u8,
    pub trace_id: String,
    pub span_id: String,
    pub endpoint: String,
    pub app_service: String,
    pub app_instance: String,
    #[serde(flatten)]
    pub tags: TagSet,
    #[serde(flatten)]
    pub universal: UniversalTag,
}

impl Poolable for FlowLogRecord {
    fn reset(&mut self) {
        self.time = 0;
        self.id = 0;
        self.msg_type = MessageType::default();
        self.flow_id = 0;
        self.start_time = 0;
        self.end_time = 0;
        self.create_time = DateTime::<Utc>::default();
        self.in_time = DateTime::<Utc>::default();
        self.ip = IpUnion::default();
        self.protocol = 0;
        self.server_port = 0;
        self.l7_protocol.clear();
        self.request_type.clear();
        self.request_domain.clear();
        self.request_resource.clear();
        self.response_code = None;
        self.response_status = 0;
        self.trace_id.clear();
        self.span_id.clear();
        self.endpoint.clear();
        self.app_service.clear();
        self.app_instance.clear();
        self.tags.clear();
        self.universal = UniversalTag::default();
    }
}

impl FlowLogRecord {
    pub fn is_l7(&self) -> bool {
        self.flow_log_id() == FlowLogId::L7Flow
    }

    fn fill(&mut self, input: FlowLogInput, ctx: &FillContext) {
        self.msg_type = ctx.msg_type;
        self.time = micros_to_secs(input.end_time_us);
        self.id = FLOW_LOG_IDS.next_id(self.time, ctx.vtap_id);
        self.flow_id = input.flow_id;
        self.start_time = input.start_time_us;
        self.end_time = input.end_time_us;
        self.create_time = DateTime::<Utc>::from_timestamp_micros(input.end_time_us).unwrap_or_default();
        self.in_time = ctx.in_time;
        if let Some(ip) = input.ip {
            self.ip.set(ip);
        }
        self.protocol = input.protocol;
        self.server_port = input.server_port;
        self.universal.vtap_id = ctx.vtap_id;

        if !self.is_l7() {
            return;
        }
        assign(&mut self.l7_protocol, &input.l7_protocol);
        assign(&mut self.request_type, &input.request_type);
        assign(&mut self.request_domain, &input.request_domain);
        assign(&mut self.request_resource, &input.request_resource);
        self.response_code = input.response_code;
        self.response_status = input.response_status;
        assign(&mut self.trace_id, &input.trace_id);
        assign(&mut self.span_id, &input.span_id);
        assign(&mut self.endpoint, &input.span_name);
        assign(&mut self.app_service, &input.app_service);
        assign(&mut self.app_instance, &input.app_instance);
        self.tags.extend(input.attributes);
    }
}

impl Record for FlowLogRecord {
    type Input = FlowLogInput;

    fn decode_into(
        input: FlowLogInput,
        ctx: &FillContext,
        pool: &RecordPool<Self>,
        out: &mut Vec<Pooled<Self>>,
    ) {
        let mut record = pool.acquire();
        record.fill(input, ctx);
        out.push(record);
    }

    fn flow_log_id(&self) -> FlowLogId {
        self.msg_type.flow_log_id()
    }

    fn time(&self) -> u32 {
        self.time
    }

    fn enrich(&mut self, platform: &dyn PlatformLookup) {
        let vtap_id = self.universal.vtap_id;
        self.universal
            .fill_resource(vtap_id, self.ip.addr(), self.protocol, self.server_port, platform);
    }

    fn append_well_known_tags(&mut self) {
        if !self.is_l7() {
            return;
        }
        if !self.app_service.is_empty() {
            self.tags.push("app_service", self.app_service.as_str());
        }
        if !self.app_instance.is_empty() {
            self.tags.push("app_instance", self.app_instance.as_str());
        }
    }

    fn tags(&self) -> &TagSet {
        &self.tags
    }

    fn universal_tag(&self) -> Option<&UniversalTag> {
        Some(&self.universal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::split_id;

    fn ctx(msg_type: MessageType) -> FillContext {
        FillContext::new(msg_type, 7, DateTime::<Utc>::from_timestamp(1_700_000_100, 0).unwrap())
    }

    fn l7_input() -> FlowLogInput {
        FlowLogInput {
            flow_id: 11,
            start_time_us: 1_700_000_000_000_000,
            end_time_us: 1_700_000_001_500_000,
            ip: Some("10.0.0.1".parse().unwrap()),
            protocol: 6,
            server_port: 443,
            l7_protocol: "HTTP".into(),
            request_resource: "/api/cart".into(),
            span_name: "GET /api/cart".into(),
            app_service: "checkout".into(),
            attributes: [("http.flavor".to_string(), "1.1".to_string())].into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_l7_fill_and_tags() {
        let pool = RecordPool::<FlowLogRecord>::new(4);
        let mut out = Vec::new();
        FlowLogRecord::decode_into(l7_input(), &ctx(MessageType::ProtocolLog), &pool, &mut out);

        let record = &mut out[0];
        record.append_well_known_tags();
        assert_eq!(record.flow_log_id(), FlowLogId::L7Flow);
        assert_eq!(record.time, 1_700_000_001);
        assert_eq!(split_id(record.id).0, 1_700_000_001);
        assert_eq!(split_id(record.id).1, 7);
        assert_eq!(record.endpoint, "GET /api/cart");
        assert_eq!(record.tags.names(), ["http.flavor", "app_service"]);
        assert_eq!(record.tags.names().len(), record.tags.values().len());
    }

    #[test]
    fn test_l4_carries_no_tags() {
        let pool = RecordPool::<FlowLogRecord>::new(4);
        let mut out = Vec::new();
        FlowLogRecord::decode_into(l7_input(), &ctx(MessageType::TaggedFlow), &pool, &mut out);

        let record = &mut out[0];
        record.append_well_known_tags();
        assert_eq!(record.flow_log_id(), FlowLogId::L4Flow);
        assert!(record.tags.is_empty());
        assert!(record.l7_protocol.is_empty());
    }

    #[test]
    fn test_released_record_comes_back_empty() {
        let pool = RecordPool::<FlowLogRecord>::new(4);
        let mut out = Vec::new();
        FlowLogRecord::decode_into(l7_input(), &ctx(MessageType::ProtocolLog), &pool, &mut out);
        out.clear();

        let record = pool.acquire();
        assert_eq!(pool.stats().hits, 1);
        assert!(record.tags.is_empty());
        assert!(record.tags.capacity() > 0);
        assert!(record.app_service.is_empty());
        assert_eq!(record.universal, UniversalTag::default());
    }

    #[test]
    fn test_serialized_columns() {
        let pool = RecordPool::<FlowLogRecord>::new(1);
        let mut out = Vec::new();
        FlowLogRecord::decode_into(l7_input(), &ctx(MessageType::ProtocolLog), &pool, &mut out);

        let json = serde_json::to_value(&*out[0]).unwrap();
        assert_eq!(json["ip4"], "10.0.0.1");
        assert_eq!(json["is_ipv4"], true);
        assert_eq!(json["vtap_id"], 7);
        assert_eq!(json["tag_names"], serde_json::json!(["http.flavor"]));
        assert!(json.get("msg_type").is_none());
        assert!(json.get("_id").is_some());
    }
}
