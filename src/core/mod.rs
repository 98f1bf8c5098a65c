//! Shared configuration, errors and identifiers for the ingester.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{IngestError, Result};
pub use types::{FlowLogId, MessageType, FLOW_LOG_DB, FLOW_TAG_DB, PROFILE_DB};
