//! The helper's main thread: the only thread that loads plugins, touches their state, or
//! drives their editor.

use crate::shared::{HelperShared, Wake};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use outboard_bridge::{
    capture_state, restore_state, Command, PluginFactory, Response, Result, StateToken,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const WAKE_POLL: Duration = Duration::from_millis(100);

pub struct MainThread {
    shared: Arc<HelperShared>,
    factory: Box<dyn PluginFactory>,
    wake_rx: Receiver<Wake>,
}

impl MainThread {
    pub fn new(
        shared: Arc<HelperShared>,
        factory: Box<dyn PluginFactory>,
        wake_rx: Receiver<Wake>,
    ) -> Self {
        Self {
            shared,
            factory,
            wake_rx,
        }
    }

    /// Runs until the stop flag is raised.
    pub fn run(&mut self) {
        tracing::debug!("main thread running");
        while !self.shared.is_stopping() {
            match self.wake_rx.recv_timeout(WAKE_POLL) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => self.pump(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Some(mut plugin) = self.shared.plugin.lock().take() {
            plugin.close_editor();
            tracing::info!(plugin = plugin.name(), "plugin unloaded");
        }
    }

    /// Applies queued commands in arrival order, then answers a pending state request.
    pub fn pump(&mut self) {
        for line in self.shared.take_queued() {
            match Command::parse(&line) {
                Ok(command) => {
                    if let Err(e) = self.execute(command) {
                        tracing::error!(line = %line, error = %e, "command failed");
                    }
                }
                Err(e) => tracing::warn!(line = %line, error = %e, "dropping malformed command"),
            }
        }

        let shared = self.shared.clone();
        shared.serve_sync(|| state_response(&shared));
    }

    pub fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::LoadPlugin {
                path,
                sample_rate,
                block_len,
            } => self.load(Some(&path), sample_rate, block_len, None),
            Command::LoadAndSetState {
                path,
                sample_rate,
                block_len,
                state,
            } => self.load(Some(&path), sample_rate, block_len, Some(&state)),
            Command::Init {
                sample_rate,
                block_len,
            } => self.load(None, sample_rate, block_len, None),
            Command::InitWithState {
                sample_rate,
                block_len,
                state,
            } => self.load(None, sample_rate, block_len, Some(&state)),
            Command::SetState(state) => {
                let token = StateToken::decode(&state)?;
                match self.shared.plugin.lock().as_mut() {
                    Some(plugin) => restore_state(plugin.as_mut(), &token),
                    None => {
                        tracing::warn!("set_state without a plugin");
                        Ok(())
                    }
                }
            }
            Command::ShowGui => match self.shared.plugin.lock().as_mut() {
                Some(plugin) => plugin.open_editor(),
                None => Ok(()),
            },
            Command::HideGui => {
                if let Some(plugin) = self.shared.plugin.lock().as_mut() {
                    plugin.close_editor();
                }
                Ok(())
            }
            // answered by the channel thread
            Command::Exit | Command::GetState => Ok(()),
        }
    }

    /// Builds the new plugin outside the lock so the audio thread keeps passing audio
    /// through while it loads.
    fn load(
        &mut self,
        path: Option<&Path>,
        sample_rate: f64,
        block_len: usize,
        state: Option<&str>,
    ) -> Result<()> {
        let previous = self.shared.plugin.lock().take();
        if let Some(mut previous) = previous {
            previous.close_editor();
        }

        let mut plugin = match path {
            Some(path) => self.factory.load(path, sample_rate, block_len)?,
            None => self.factory.load_default(sample_rate, block_len)?,
        };

        if let Some(state) = state.filter(|s| !s.is_empty()) {
            match StateToken::decode(state) {
                Ok(token) => {
                    if let Err(e) = restore_state(plugin.as_mut(), &token) {
                        tracing::warn!(error = %e, "initial state not applied");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "initial state not decoded"),
            }
        }

        tracing::info!(plugin = plugin.name(), sample_rate, block_len, "plugin ready");
        *self.shared.plugin.lock() = Some(plugin);
        Ok(())
    }
}

fn state_response(shared: &HelperShared) -> Response {
    let mut slot = shared.plugin.lock();
    let Some(plugin) = slot.as_mut() else {
        return Response::fail("NoPlugin");
    };

    match capture_state(plugin.as_mut()) {
        Ok(token) => Response::ok_with(token.encode()),
        Err(e) => {
            tracing::warn!(error = %e, "state capture failed");
            Response::fail(e.to_string())
        }
    }
}
