//! Classifies incoming command lines and produces the immediate response.

use crate::shared::HelperShared;
use outboard_bridge::protocol::EXIT_ACK;
use outboard_bridge::{CommandClass, CommandKind, Response};
use std::sync::Arc;

pub struct Dispatcher {
    shared: Arc<HelperShared>,
}

impl Dispatcher {
    pub fn new(shared: Arc<HelperShared>) -> Self {
        Self { shared }
    }

    /// `None` for blank lines, which get no response.
    pub fn handle_line(&self, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(kind) = CommandKind::of_line(line) else {
            tracing::warn!(line, "unknown command");
            return Some(Response::fail("unknown command"));
        };

        let response = match kind.class() {
            CommandClass::Immediate => {
                tracing::info!("exit requested");
                self.shared.request_stop();
                Response::ok_with(EXIT_ACK)
            }
            CommandClass::Sync => self.shared.call_sync(),
            CommandClass::Queued => {
                tracing::debug!(command = kind.keyword(), "queued");
                self.shared.enqueue(line.to_string());
                Response::ok()
            }
        };
        Some(response)
    }

    pub fn line_too_long(&self) -> Response {
        tracing::warn!("rejecting over-long command line");
        Response::fail("line too long")
    }
}
