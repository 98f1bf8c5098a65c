//! Message types, flow kinds and other small shared identifiers.

use crate::core::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Database that holds every flow-log table.
pub const FLOW_LOG_DB: &str = "flow_log";
/// Database that holds profile tables.
pub const PROFILE_DB: &str = "profile";
/// Database that holds flow tag tables.
pub const FLOW_TAG_DB: &str = "flow_tag";

/// Kind of inbound message an agent reports.
///
/// Each message type gets its own decode queue set and decoders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// L4 flow log (tagged flow)
    #[default]
    TaggedFlow,
    /// L7 protocol log
    ProtocolLog,
    /// OpenTelemetry spans converted to L7 flow logs
    OpenTelemetry,
    /// Compressed OpenTelemetry spans
    OpenTelemetryCompressed,
    /// L4 packet sequence blocks
    PacketSequence,
    /// In-process continuous profiling samples
    Profile,
}

impl MessageType {
    /// All message types, in service start order.
    pub const ALL: [MessageType; 6] = [
        MessageType::TaggedFlow,
        MessageType::ProtocolLog,
        MessageType::PacketSequence,
        MessageType::OpenTelemetry,
        MessageType::OpenTelemetryCompressed,
        MessageType::Profile,
    ];

    /// Short name used in queue, thread and platform table names.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TaggedFlow => "l4",
            MessageType::ProtocolLog => "l7",
            MessageType::OpenTelemetry => "otel",
            MessageType::OpenTelemetryCompressed => "otel-compressed",
            MessageType::PacketSequence => "l4-packet",
            MessageType::Profile => "profile",
        }
    }

    /// Flow kind records of this message type are written as.
    pub fn flow_log_id(&self) -> FlowLogId {
        match self {
            MessageType::TaggedFlow => FlowLogId::L4Flow,
            MessageType::ProtocolLog
            | MessageType::OpenTelemetry
            | MessageType::OpenTelemetryCompressed => FlowLogId::L7Flow,
            MessageType::PacketSequence => FlowLogId::L4Packet,
            MessageType::Profile => FlowLogId::InProcessProfile,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l4" | "tagged_flow" => Ok(MessageType::TaggedFlow),
            "l7" | "protocol_log" => Ok(MessageType::ProtocolLog),
            "otel" | "open_telemetry" => Ok(MessageType::OpenTelemetry),
            "otel-compressed" | "open_telemetry_compressed" => {
                Ok(MessageType::OpenTelemetryCompressed)
            },
            "l4-packet" | "packet_sequence" => Ok(MessageType::PacketSequence),
            "profile" => Ok(MessageType::Profile),
            other => Err(IngestError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Flow kind a record is routed to inside the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowLogId {
    /// `flow_log.l4_flow_log`
    L4Flow,
    /// `flow_log.l7_flow_log`
    L7Flow,
    /// `flow_log.l4_packet`
    L4Packet,
    /// `profile.in_process`
    InProcessProfile,
}

impl FlowLogId {
    /// Table name records of this kind are stored in.
    pub fn table_name(&self) -> &'static str {
        match self {
            FlowLogId::L4Flow => "l4_flow_log",
            FlowLogId::L7Flow => "l7_flow_log",
            FlowLogId::L4Packet => "l4_packet",
            FlowLogId::InProcessProfile => "in_process",
        }
    }

    /// Database the table lives in.
    pub fn database(&self) -> &'static str {
        match self {
            FlowLogId::InProcessProfile => PROFILE_DB,
            _ => FLOW_LOG_DB,
        }
    }
}

impl fmt::Display for FlowLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database(), self.table_name())
    }
}
