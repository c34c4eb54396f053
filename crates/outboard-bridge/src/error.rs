//! Error types for the plugin bridge

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStage {
    Resolving,
    Spawning,
    Connecting,
    SharedMemory,
    Events,
    Initializing,
}

impl LaunchStage {
    /// Stages after the process exists; a failure here means the process must be torn down.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LaunchStage::Connecting | LaunchStage::SharedMemory | LaunchStage::Events
        )
    }
}

impl std::fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchStage::Resolving => write!(f, "resolving helper"),
            LaunchStage::Spawning => write!(f, "spawning helper process"),
            LaunchStage::Connecting => write!(f, "connecting command channel"),
            LaunchStage::SharedMemory => write!(f, "opening shared block"),
            LaunchStage::Events => write!(f, "opening handshake events"),
            LaunchStage::Initializing => write!(f, "initializing plugin"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Helper launch failed at {stage} stage: {path}\n  Reason: {reason}")]
    Launch {
        path: PathBuf,
        stage: LaunchStage,
        reason: String,
    },

    #[error("Channel connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Shared memory error: {0}")]
    SharedMemoryError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Helper process crashed")]
    ProcessCrashed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The helper answered `FAIL`; the channel itself is healthy.
    #[error("Helper refused request: {0}")]
    Refused(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unknown state token format: {0}")]
    StateFormat(String),

    #[error("Failed to restore plugin state: {0}")]
    StateRestore(String),

    #[error("Plugin load failed: {0}")]
    PluginLoad(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub(crate) fn launch(path: impl Into<PathBuf>, stage: LaunchStage, reason: impl ToString) -> Self {
        BridgeError::Launch {
            path: path.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
