//! Scoped transport for one running helper.
//!
//! A [`HelperSession`] exists only when every transport handle was acquired. Dropping it
//! asks the helper to exit, escalates to a kill after the grace period, and releases the
//! handles in field order: process, channel, shared block, events.

use crate::codec::HandshakePeer;
use crate::config::{BridgeConfig, SessionNames};
use crate::error::{BridgeError, LaunchStage, Result};
use crate::event::{ResetMode, SharedEvent};
use crate::process::{HelperProcess, Liveness};
use crate::protocol::{Command, Response};
use crate::shared_memory::{remove_stale, SharedBlock};
use crate::transport::CommandChannel;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;

pub struct HelperSession {
    process: HelperProcess,
    channel: Mutex<CommandChannel>,
    block: SharedBlock,
    ready: SharedEvent,
    done: SharedEvent,
    session_id: u64,
    names: SessionNames,
    exit_grace: Duration,
    command_timeout: Duration,
}

impl HelperSession {
    /// Spawns `executable`, connects every transport handle, and sends `init`.
    ///
    /// `plugin_path` only labels errors. Any failure tears down what was acquired so far.
    pub fn launch(
        executable: &Path,
        plugin_path: &Path,
        session_id: u64,
        config: &BridgeConfig,
        init: &Command,
    ) -> Result<Self> {
        let names = config.names.for_session(session_id);
        let init_line = init
            .to_line()
            .map_err(|e| BridgeError::launch(plugin_path, LaunchStage::Initializing, e))?;

        let process = HelperProcess::spawn(executable, session_id, &names, config.max_block_len)
            .map_err(|e| BridgeError::launch(plugin_path, LaunchStage::Spawning, e))?;

        let channel = match CommandChannel::connect(
            &names.channel,
            config.connect_attempts,
            config.connect_backoff(),
            config.max_line_len,
        ) {
            Ok(channel) => channel,
            Err(e) => {
                process.kill();
                cleanup_names(&names);
                return Err(BridgeError::launch(plugin_path, LaunchStage::Connecting, e));
            }
        };

        let block = match SharedBlock::open(&names.shared_block, config.max_block_len) {
            Ok(block) => block,
            Err(e) => {
                process.kill();
                cleanup_names(&names);
                return Err(BridgeError::launch(plugin_path, LaunchStage::SharedMemory, e));
            }
        };

        let events = SharedEvent::open(&names.ready_event, ResetMode::Manual).and_then(|ready| {
            SharedEvent::open(&names.done_event, ResetMode::Auto).map(|done| (ready, done))
        });
        let (ready, done) = match events {
            Ok(pair) => pair,
            Err(e) => {
                process.kill();
                cleanup_names(&names);
                return Err(BridgeError::launch(plugin_path, LaunchStage::Events, e));
            }
        };

        let session = Self {
            process,
            channel: Mutex::new(channel),
            block,
            ready,
            done,
            session_id,
            names,
            exit_grace: config.exit_grace(),
            command_timeout: config.command_timeout(),
        };

        // The session's Drop handles teardown from here on.
        match session.request_line(&init_line) {
            Ok(Response::Ok(_)) => {}
            Ok(Response::Fail(reason)) => {
                return Err(BridgeError::launch(plugin_path, LaunchStage::Initializing, reason))
            }
            Err(e) => return Err(BridgeError::launch(plugin_path, LaunchStage::Initializing, e)),
        }

        tracing::info!(
            session_id,
            pid = session.process.pid(),
            plugin = %plugin_path.display(),
            "helper session connected"
        );

        Ok(session)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn names(&self) -> &SessionNames {
        &self.names
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn liveness(&self) -> Liveness {
        self.process.liveness()
    }

    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    fn request_line(&self, line: &str) -> Result<Response> {
        let raw = self.channel.lock().request(line, self.command_timeout)?;
        Response::parse(&raw)
    }

    /// One request/response round trip. Requests are serialized per session.
    pub fn request(&self, command: &Command) -> Result<Response> {
        self.request_line(&command.to_line()?)
    }

    /// Raw state token from `get_state`, `EMPTY` included.
    pub fn fetch_state(&self) -> Result<String> {
        match self.request(&Command::GetState)? {
            Response::Ok(Some(token)) => Ok(token),
            Response::Ok(None) => Err(BridgeError::Protocol(
                "get_state answered without a token".to_string(),
            )),
            Response::Fail(reason) => Err(BridgeError::Refused(format!("get_state: {}", reason))),
        }
    }
}

impl HandshakePeer for HelperSession {
    fn block(&self) -> &SharedBlock {
        &self.block
    }

    fn ready(&self) -> &SharedEvent {
        &self.ready
    }

    fn done(&self) -> &SharedEvent {
        &self.done
    }

    fn is_alive(&self) -> bool {
        self.process.is_alive()
    }
}

impl Drop for HelperSession {
    fn drop(&mut self) {
        if self.process.is_alive() {
            let timeout = self.command_timeout.min(self.exit_grace);
            match self.channel.get_mut().request("exit", timeout) {
                Ok(response) => {
                    tracing::debug!(session_id = self.session_id, %response, "exit acknowledged")
                }
                Err(e) => {
                    tracing::debug!(session_id = self.session_id, error = %e, "exit request failed")
                }
            }
            self.process.terminate(self.exit_grace);
        }

        cleanup_names(&self.names);
        tracing::debug!(session_id = self.session_id, "helper session released");
    }
}

/// Removes objects a dead helper could not clean up itself.
fn cleanup_names(names: &SessionNames) {
    remove_stale(&names.shared_block);
    remove_stale(&names.ready_event);
    remove_stale(&names.done_event);

    #[cfg(unix)]
    {
        let _ = std::fs::remove_file(crate::transport::channel_path(&names.channel));
    }
}
