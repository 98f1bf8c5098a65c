//! Telemetry records and the machinery to recycle them.
//!
//! Every record type implements [`Record`]: it knows how to fill itself from
//! its decoded input, how to enrich itself from the platform tables and
//! which table it is written to. Records always come from a [`RecordPool`]
//! and go back to it when the writer is done with them.

pub mod flow_log;
pub mod id;
pub mod packet;
pub mod pool;
pub mod profile;
pub mod tags;
pub mod universal;

pub use flow_log::{FlowLogInput, FlowLogRecord};
pub use id::{gen_id, split_id, IdGenerator};
pub use packet::{PacketSequenceInput, PacketSequenceRecord};
pub use pool::{PoolStats, Poolable, Pooled, RecordPool};
pub use profile::{ProfileFrame, ProfileInput, ProfileRecord};
pub use tags::TagSet;
pub use universal::{IpUnion, UniversalTag};

use crate::core::{FlowLogId, MessageType};
use crate::platform::PlatformLookup;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Where and when a decoded input arrived.
#[derive(Debug, Clone, Copy)]
pub struct FillContext {
    pub msg_type: MessageType,
    pub vtap_id: u16,
    /// Server-side ingest time, shared by every record of one buffer
    pub in_time: DateTime<Utc>,
}

impl FillContext {
    pub fn new(msg_type: MessageType, vtap_id: u16, in_time: DateTime<Utc>) -> Self {
        Self {
            msg_type,
            vtap_id,
            in_time,
        }
    }
}

/// A row of one of the telemetry tables.
pub trait Record: Poolable + Serialize + Sync + fmt::Debug {
    /// Decoded form of one input item.
    type Input: DeserializeOwned + Send + 'static;

    /// Fill records from `input` and append them to `out`.
    ///
    /// Most inputs map to one record; an input may also expand to several
    /// (a profile stack yields one record per frame).
    fn decode_into(
        input: Self::Input,
        ctx: &FillContext,
        pool: &RecordPool<Self>,
        out: &mut Vec<Pooled<Self>>,
    );

    /// Table the record is written to.
    fn flow_log_id(&self) -> FlowLogId;

    /// Row time in epoch seconds.
    fn time(&self) -> u32;

    /// Look up topology attributes. A miss leaves them at zero.
    fn enrich(&mut self, _platform: &dyn PlatformLookup) {}

    /// Append the tags the record always carries after the input's own.
    fn append_well_known_tags(&mut self) {}

    fn tags(&self) -> &TagSet;

    fn universal_tag(&self) -> Option<&UniversalTag> {
        None
    }
}

/// One pool per record type, shared by every logger producing that type.
#[derive(Clone)]
pub struct RecordPools {
    pub flow_log: RecordPool<FlowLogRecord>,
    pub packet: RecordPool<PacketSequenceRecord>,
    pub profile: RecordPool<ProfileRecord>,
}

impl RecordPools {
    pub fn new(capacity: usize) -> Self {
        Self {
            flow_log: RecordPool::new(capacity),
            packet: RecordPool::new(capacity),
            profile: RecordPool::new(capacity),
        }
    }

    pub fn stats(&self) -> Vec<(&'static str, PoolStats)> {
        vec![
            ("flow_log", self.flow_log.stats()),
            ("packet", self.packet.stats()),
            ("profile", self.profile.stats()),
        ]
    }
}

/// Microseconds since the epoch to whole seconds, clamped to `u32`.
#[inline]
pub(crate) fn micros_to_secs(micros: i64) -> u32 {
    (micros.max(0) / 1_000_000).min(i64::from(u32::MAX)) as u32
}

/// Overwrite `dst` with `src`, reusing its allocation.
#[inline]
pub(crate) fn assign(dst: &mut String, src: &str) {
    dst.clear();
    dst.push_str(src);
}
