//! In-process continuous profiling rows.
//!
//! An agent reports a stack per sample. Each frame becomes one row; rows of
//! one stack are linked root to leaf through `profile_parent_node_id`, and a
//! row's node id is its `_id`.

use super::{
    assign, id::PROFILE_IDS, micros_to_secs, FillContext, IpUnion, Poolable, Pooled, Record,
    RecordPool, TagSet, UniversalTag,
};
use crate::core::FlowLogId;
use crate::platform::PlatformLookup;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

pub const LABEL_APP_SERVICE: &str = "app_service";
pub const LABEL_LANGUAGE_TYPE: &str = "profile_language_type";
pub const LABEL_TRACE_ID: &str = "trace_id";
pub const LABEL_SPAN_NAME: &str = "span_name";
pub const LABEL_APP_INSTANCE: &str = "app_instance";

// service lookups for profiles always use TCP without a port
const PROFILE_PROTOCOL: u8 = 6;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileFrame {
    pub location: String,
    /// Self value of the frame
    pub value: i64,
}

/// One sampled stack.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileInput {
    pub app_service: String,
    /// `<app_service>.<event type>`, e.g. `checkout.cpu`
    pub app_name: String,
    pub units: String,
    pub start_time_us: i64,
    pub language_type: String,
    pub profile_id: String,
    pub app_instance: String,
    pub ip: Option<IpAddr>,
    pub labels: BTreeMap<String, String>,
    /// Frames from root to leaf
    pub frames: Vec<ProfileFrame>,
}

/// Row of `profile.in_process`.
#[derive(Debug, Default, Serialize)]
pub struct ProfileRecord {
    pub time: u32,
    #[serde(rename = "_id")]
    pub id: u64,
    #[serde(flatten)]
    pub ip: IpUnion,
    pub app_service: String,
    pub profile_location_str: String,
    pub profile_event_type: String,
    pub profile_value: i64,
    pub profile_value_unit: String,
    pub profile_create_timestamp: i64,
    pub profile_in_timestamp: i64,
    pub profile_language_type: String,
    pub profile_node_id: u64,
    pub profile_parent_node_id: u64,
    pub profile_id: String,
    pub trace_id: String,
    pub span_name: String,
    pub app_instance: String,
    #[serde(flatten)]
    pub tags: TagSet,
    #[serde(flatten)]
    pub universal: UniversalTag,
}

impl Poolable for ProfileRecord {
    fn reset(&mut self) {
        self.time = 0;
        self.id = 0;
        self.ip = IpUnion::default();
        self.app_service.clear();
        self.profile_location_str.clear();
        self.profile_event_type.clear();
        self.profile_value = 0;
        self.profile_value_unit.clear();
        self.profile_create_timestamp = 0;
        self.profile_in_timestamp = 0;
        self.profile_language_type.clear();
        self.profile_node_id = 0;
        self.profile_parent_node_id = 0;
        self.profile_id.clear();
        self.trace_id.clear();
        self.span_name.clear();
        self.app_instance.clear();
        self.tags.clear();
        self.universal = UniversalTag::default();
    }
}

impl ProfileRecord {
    fn fill(
        &mut self,
        input: &ProfileInput,
        frame: &ProfileFrame,
        ctx: &FillContext,
        parent_id: u64,
    ) {
        self.time = ctx.in_time.timestamp().clamp(0, i64::from(u32::MAX)) as u32;
        self.id = PROFILE_IDS.next_id(micros_to_secs(input.start_time_us), ctx.vtap_id);
        if let Some(ip) = input.ip {
            self.ip.set(ip);
        }
        assign(&mut self.app_service, &input.app_service);
        assign(&mut self.profile_location_str, &frame.location);
        assign(&mut self.profile_event_type, event_type(&input.app_name, &input.app_service));
        self.profile_value = frame.value;
        assign(&mut self.profile_value_unit, &input.units);
        self.profile_create_timestamp = input.start_time_us;
        self.profile_in_timestamp = ctx.in_time.timestamp_micros();
        assign(&mut self.profile_language_type, &input.language_type);
        self.profile_node_id = self.id;
        self.profile_parent_node_id = parent_id;
        assign(&mut self.profile_id, &input.profile_id);
        if let Some(trace_id) = input.labels.get(LABEL_TRACE_ID) {
            assign(&mut self.trace_id, trace_id);
        }
        if let Some(span_name) = input.labels.get(LABEL_SPAN_NAME) {
            assign(&mut self.span_name, span_name);
        }
        assign(&mut self.app_instance, &input.app_instance);
        self.tags
            .extend(input.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        self.universal.vtap_id = ctx.vtap_id;
    }
}

/// Event type of a profile: the app name without its `<service>.` prefix.
pub fn event_type<'a>(app_name: &'a str, app_service: &str) -> &'a str {
    app_name
        .strip_prefix(app_service)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(app_name)
}

impl Record for ProfileRecord {
    type Input = ProfileInput;

    fn decode_into(
        input: ProfileInput,
        ctx: &FillContext,
        pool: &RecordPool<Self>,
        out: &mut Vec<Pooled<Self>>,
    ) {
        let mut parent_id = 0;
        for frame in &input.frames {
            let mut record = pool.acquire();
            record.fill(&input, frame, ctx, parent_id);
            parent_id = record.profile_node_id;
            out.push(record);
        }
    }

    fn flow_log_id(&self) -> FlowLogId {
        FlowLogId::InProcessProfile
    }

    fn time(&self) -> u32 {
        self.time
    }

    fn enrich(&mut self, platform: &dyn PlatformLookup) {
        let vtap_id = self.universal.vtap_id;
        self.universal
            .fill_resource(vtap_id, self.ip.addr(), PROFILE_PROTOCOL, 0, platform);
    }

    fn append_well_known_tags(&mut self) {
        self.tags.push(LABEL_APP_SERVICE, self.app_service.as_str());
        self.tags
            .push(LABEL_LANGUAGE_TYPE, self.profile_language_type.as_str());
        self.tags.push(LABEL_TRACE_ID, self.trace_id.as_str());
        self.tags.push(LABEL_SPAN_NAME, self.span_name.as_str());
        self.tags.push(LABEL_APP_INSTANCE, self.app_instance.as_str());
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
    use crate::core::MessageType;
    use crate::record::split_id;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn input() -> ProfileInput {
        ProfileInput {
            app_service: "checkout".into(),
            app_name: "checkout.cpu".into(),
            units: "samples".into(),
            start_time_us: 1_700_000_000_000_000,
            language_type: "golang".into(),
            profile_id: "p-1".into(),
            ip: Some("10.0.0.9".parse().unwrap()),
            labels: [
                ("region".to_string(), "eu".to_string()),
                ("span_name".to_string(), "GET /".to_string()),
            ]
            .into(),
            frames: vec![
                ProfileFrame { location: "main".into(), value: 0 },
                ProfileFrame { location: "handler".into(), value: 3 },
                ProfileFrame { location: "encode".into(), value: 7 },
            ],
            ..Default::default()
        }
    }

    fn decode() -> Vec<Pooled<ProfileRecord>> {
        let pool = RecordPool::new(8);
        let ctx = FillContext::new(
            MessageType::Profile,
            5,
            DateTime::<Utc>::from_timestamp(1_700_000_060, 0).unwrap(),
        );
        let mut out = Vec::new();
        ProfileRecord::decode_into(input(), &ctx, &pool, &mut out);
        out
    }

    #[test]
    fn test_frames_linked_root_to_leaf() {
        let out = decode();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].profile_parent_node_id, 0);
        assert_eq!(out[1].profile_parent_node_id, out[0].profile_node_id);
        assert_eq!(out[2].profile_parent_node_id, out[1].profile_node_id);
        for record in &out {
            assert_eq!(record.profile_node_id, record.id);
            assert_eq!(split_id(record.id).0, 1_700_000_000);
            assert_eq!(record.time, 1_700_000_060);
        }
        assert_eq!(out[2].profile_value, 7);
    }

    #[test]
    fn test_event_type_and_labels() {
        let mut out = decode();
        let record = &mut out[0];
        assert_eq!(record.profile_event_type, "cpu");
        assert_eq!(record.span_name, "GET /");

        record.append_well_known_tags();
        assert_eq!(
            record.tags.names(),
            [
                "region",
                "span_name",
                "app_service",
                "profile_language_type",
                "trace_id",
                "span_name",
                "app_instance"
            ]
        );
        assert_eq!(record.tags.values()[2], "checkout");
        assert_eq!(record.tags.names().len(), record.tags.values().len());
    }

    #[test]
    fn test_event_type_without_prefix() {
        assert_eq!(event_type("cpu", "checkout"), "cpu");
        assert_eq!(event_type("checkoutcpu", "checkout"), "checkoutcpu");
        assert_eq!(event_type("checkout.alloc", "checkout"), "alloc");
    }
}
