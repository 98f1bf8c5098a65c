//! Flow log ingester - decode, enrich and throttle agent telemetry.
//!
//! Agents report L4/L7 flow logs, OpenTelemetry spans, packet sequences and
//! in-process profiles. Each message type runs through its own pipeline:
//!
//! ```text
//! Receiver -> decode queue set (N partitions) -> Decoder[i]
//!          -> ThrottlingQueue[i] -> FlowLogWriter -> Sink
//! ```
//!
//! # Architecture
//!
//! - `receiver`: routes inbound buffers to partitions by agent id
//! - `queue`: bounded partitioned queues with flush ticks
//! - `decoder`: per-partition decode, enrichment and tagging loop
//! - `platform`: hot-swappable resource snapshots for enrichment
//! - `throttler`: fixed-window admission per partition
//! - `writer`: per-table batching and sinks
//! - `flow_log`: loggers and the service composing them
//!
//! # Example
//!
//! ```no_run
//! use ingester_lib::core::Config;
//! use ingester_lib::flow_log::FlowLog;
//! use ingester_lib::receiver::Receiver;
//! use ingester_lib::writer::{MemorySink, Sink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ingester_lib::Result<()> {
//!     let config = Config::default();
//!     let receiver = Receiver::new(config.ingester.recv_buffer_pool_size);
//!     let sink: Arc<dyn Sink> = Arc::new(MemorySink::new());
//!     let mut service = FlowLog::new(config, &receiver, None, sink)?;
//!     service.start()?;
//!
//!     receiver.ingest(
//!         ingester_lib::core::MessageType::TaggedFlow,
//!         1,
//!         br#"{"flow_id": 1}"#,
//!     );
//!     service.shutdown(&receiver).await
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod codec;
pub mod core;
pub mod decoder;
pub mod flow_log;
pub mod flow_tag;
pub mod monitoring;
pub mod platform;
pub mod queue;
pub mod receiver;
pub mod record;
pub mod throttler;
pub mod writer;

// Re-export core types for convenience
pub use crate::core::{Config, IngestError, Result};
