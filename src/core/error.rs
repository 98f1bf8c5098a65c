use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Platform data error: {0}")]
    Platform(String),

    #[error("Flow tag writer error: {0}")]
    FlowTag(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Throttle {throttle} cannot be split across {partitions} partitions")]
    InvalidThrottle { throttle: usize, partitions: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for ingester operations
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Creates a new platform data error
    pub fn platform<S: Into<String>>(msg: S) -> Self {
        Self::Platform(msg.into())
    }

    /// Creates a new flow tag writer error
    pub fn flow_tag<S: Into<String>>(msg: S) -> Self {
        Self::FlowTag(msg.into())
    }

    /// Creates a new runtime error
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        Self::Runtime(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Returns true if retrying the failed operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
            ),
            _ => false,
        }
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::InvalidThrottle { .. } => "config",
            Self::Storage(_) => "storage",
            Self::Decode(_) | Self::UnknownMessageType(_) => "decode",
            Self::Platform(_) => "platform",
            Self::FlowTag(_) => "flow_tag",
            Self::Runtime(_) | Self::Join(_) => "async",
            Self::Network(_) => "network",
            Self::Io(_) => "io",
            Self::Serialization(_) | Self::Yaml(_) => "serialization",
        }
    }
}
