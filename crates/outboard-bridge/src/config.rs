//! Bridge configuration.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base names for the per-session transport objects.
///
/// Each running helper gets `base + "_" + session id` so concurrent instances never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportNames {
    pub channel: String,
    pub shared_block: String,
    pub ready_event: String,
    pub done_event: String,
}

impl Default for TransportNames {
    fn default() -> Self {
        Self {
            channel: "OutboardBridge".to_string(),
            shared_block: "OutboardSharedAudio".to_string(),
            ready_event: "OutboardClientReady".to_string(),
            done_event: "OutboardHostDone".to_string(),
        }
    }
}

impl TransportNames {
    pub fn for_session(&self, session_id: u64) -> SessionNames {
        SessionNames {
            channel: format!("{}_{}", self.channel, session_id),
            shared_block: format!("{}_{}", self.shared_block, session_id),
            ready_event: format!("{}_{}", self.ready_event, session_id),
            done_event: format!("{}_{}", self.done_event, session_id),
        }
    }
}

/// Concrete transport names for one helper session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNames {
    pub channel: String,
    pub shared_block: String,
    pub ready_event: String,
    pub done_event: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Samples per channel the shared block holds for one handshake.
    pub max_block_len: usize,
    pub handshake_timeout_ms: u64,
    /// Crashes closer together than this count toward the disable threshold.
    pub crash_window_ms: u64,
    pub max_restart_attempts: u32,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    /// Grace period between the `exit` request and forced termination.
    pub exit_grace_ms: u64,
    pub command_timeout_ms: u64,
    pub max_line_len: usize,
    pub names: TransportNames,
    /// Directory holding the helper executables named in `mappings`.
    pub helper_dir: PathBuf,
    /// Plugin extensions that are themselves helper executables.
    pub standalone_extensions: Vec<String>,
    /// Plugin file extension (without the dot) to helper executable name.
    pub mappings: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let helper_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            max_block_len: 2048,
            handshake_timeout_ms: 500,
            crash_window_ms: 60_000,
            max_restart_attempts: 3,
            connect_attempts: 50,
            connect_backoff_ms: 100,
            exit_grace_ms: 2000,
            command_timeout_ms: 5000,
            max_line_len: 1 << 20,
            names: TransportNames::default(),
            helper_dir,
            standalone_extensions: vec!["exe".to_string()],
            mappings: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_block_len == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_block_len must be greater than zero".to_string(),
            ));
        }
        if self.max_block_len > i32::MAX as usize {
            return Err(BridgeError::InvalidConfig(format!(
                "max_block_len {} does not fit the block header",
                self.max_block_len
            )));
        }
        if self.handshake_timeout_ms == 0 || self.command_timeout_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_restart_attempts == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_restart_attempts must be at least 1".to_string(),
            ));
        }
        if self.connect_attempts == 0 {
            return Err(BridgeError::InvalidConfig(
                "connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_line_len < 64 {
            return Err(BridgeError::InvalidConfig(format!(
                "max_line_len {} is too small for a command line",
                self.max_line_len
            )));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn crash_window(&self) -> Duration {
        Duration::from_millis(self.crash_window_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Adds an extension mapping, normalizing the extension to lowercase without a dot.
    pub fn map_extension(mut self, extension: &str, helper: impl Into<String>) -> Self {
        self.mappings
            .insert(normalize_extension(extension), helper.into());
        self
    }
}

pub(crate) fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}
