//! L4 packet sequence blocks.

use super::{
    id::PACKET_IDS, micros_to_secs, FillContext, Poolable, Pooled, Record, RecordPool, TagSet,
};
use crate::core::FlowLogId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One packet block as reported by an agent; `batch` is hex encoded.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PacketSequenceInput {
    pub flow_id: u64,
    pub start_time_us: i64,
    pub end_time_us: i64,
    pub packet_count: u32,
    #[serde(deserialize_with = "from_hex")]
    pub batch: Vec<u8>,
}

/// Row of `flow_log.l4_packet`. Packet blocks are opaque and never enriched.
#[derive(Debug, Default, Serialize)]
pub struct PacketSequenceRecord {
    pub time: u32,
    #[serde(rename = "_id")]
    pub id: u64,
    pub flow_id: u64,
    pub vtap_id: u16,
    pub start_time: i64,
    pub end_time: i64,
    pub packet_count: u32,
    #[serde(serialize_with = "to_hex")]
    pub packet_batch: Vec<u8>,
    #[serde(skip)]
    tags: TagSet,
}

impl Poolable for PacketSequenceRecord {
    fn reset(&mut self) {
        self.time = 0;
        self.id = 0;
        self.flow_id = 0;
        self.vtap_id = 0;
        self.start_time = 0;
        self.end_time = 0;
        self.packet_count = 0;
        self.packet_batch.clear();
    }
}

impl Record for PacketSequenceRecord {
    type Input = PacketSequenceInput;

    fn decode_into(
        input: PacketSequenceInput,
        ctx: &FillContext,
        pool: &RecordPool<Self>,
        out: &mut Vec<Pooled<Self>>,
    ) {
        let mut record = pool.acquire();
        record.time = micros_to_secs(input.end_time_us);
        record.id = PACKET_IDS.next_id(record.time, ctx.vtap_id);
        record.flow_id = input.flow_id;
        record.vtap_id = ctx.vtap_id;
        record.start_time = input.start_time_us;
        record.end_time = input.end_time_us;
        record.packet_count = input.packet_count;
        record.packet_batch.extend_from_slice(&input.batch);
        out.push(record);
    }

    fn flow_log_id(&self) -> FlowLogId {
        FlowLogId::L4Packet
    }

    fn time(&self) -> u32 {
        self.time
    }

    fn tags(&self) -> &TagSet {
        &self.tags
    }
}

fn from_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    hex::decode(s).map_err(serde::de::Error::custom)
}

fn to_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}
