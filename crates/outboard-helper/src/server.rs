//! Helper process server.
//!
//! Owns the transport endpoints for one session and runs three threads: the channel thread
//! answering command lines, the audio thread serving handshakes, and the caller's thread as
//! the main thread.

use crate::args::HelperArgs;
use crate::audio_loop::AudioLoop;
use crate::dispatcher::Dispatcher;
use crate::main_thread::MainThread;
use crate::shared::HelperShared;
use outboard_bridge::transport::{ChannelListener, ChannelStream, LineRead};
use outboard_bridge::{
    BridgeConfig, BridgeError, PluginFactory, ResetMode, Result, SharedBlock, SharedEvent,
};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const STOP_POLL: Duration = Duration::from_millis(100);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HelperServer {
    args: HelperArgs,
    max_line_len: usize,
    shared: Arc<HelperShared>,
    block: Arc<SharedBlock>,
    ready: Arc<SharedEvent>,
    done: Arc<SharedEvent>,
}

impl HelperServer {
    /// Server without a main thread to wake; only the channel and audio threads run.
    #[cfg(test)]
    fn new(args: HelperArgs) -> Result<Self> {
        let (shared, _) = HelperShared::new();
        Self::with_shared(args, Arc::new(shared))
    }

    /// Creates the shared block and both events. The host opens them right after the
    /// channel connects, so they must exist before the listener is bound.
    fn with_shared(args: HelperArgs, shared: Arc<HelperShared>) -> Result<Self> {
        let block = SharedBlock::create(&args.names.shared_block, args.max_block_len)?;
        let ready = SharedEvent::create(&args.names.ready_event, ResetMode::Manual)?;
        let done = SharedEvent::create(&args.names.done_event, ResetMode::Auto)?;

        Ok(Self {
            max_line_len: BridgeConfig::default().max_line_len,
            args,
            shared,
            block: Arc::new(block),
            ready: Arc::new(ready),
            done: Arc::new(done),
        })
    }

    /// Serves the session until `exit` arrives; blocks the calling thread, which becomes
    /// the main thread.
    pub fn run(args: HelperArgs, factory: Box<dyn PluginFactory>) -> Result<()> {
        let (shared, wake_rx) = HelperShared::new();
        let shared = Arc::new(shared);
        let server = Self::with_shared(args, shared.clone())?;

        tracing::info!(
            session_id = server.args.session_id,
            channel = %server.args.names.channel,
            block = server.args.max_block_len,
            "helper starting"
        );

        let channel = server.spawn_channel_thread()?;
        let audio = server.spawn_audio_thread()?;

        MainThread::new(shared, factory, wake_rx).run();

        server.shutdown([("channel", channel), ("audio", audio)]);
        tracing::info!(session_id = server.args.session_id, "helper stopped");
        Ok(())
    }

    fn spawn_channel_thread(&self) -> Result<JoinHandle<()>> {
        let shared = self.shared.clone();
        let name = self.args.names.channel.clone();
        let max_line_len = self.max_line_len;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        // Bind before returning so the host's first connect attempt can already succeed.
        let listener = runtime.block_on(async { ChannelListener::bind(&name, max_line_len) })?;

        std::thread::Builder::new()
            .name("outboard-channel".to_string())
            .spawn(move || {
                let dispatcher = Dispatcher::new(shared.clone());
                runtime.block_on(serve_channel(listener, dispatcher, shared));
            })
            .map_err(BridgeError::Io)
    }

    fn spawn_audio_thread(&self) -> Result<JoinHandle<()>> {
        let mut audio = AudioLoop::new(
            self.shared.clone(),
            self.block.clone(),
            self.ready.clone(),
            self.done.clone(),
        );

        std::thread::Builder::new()
            .name("outboard-audio".to_string())
            .spawn(move || audio.run())
            .map_err(BridgeError::Io)
    }

    fn shutdown<const N: usize>(&self, threads: [(&str, JoinHandle<()>); N]) {
        self.shared.request_stop();
        // wakes the audio thread out of its ready wait
        self.ready.set();

        let deadline = Instant::now() + JOIN_TIMEOUT;
        for (name, handle) in threads {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::error!(thread = name, "thread panicked");
                }
            } else {
                tracing::warn!(thread = name, "thread did not stop in time, detaching");
            }
        }
    }
}

/// Accepts one connection at a time until the helper stops.
async fn serve_channel(
    mut listener: ChannelListener,
    dispatcher: Dispatcher,
    shared: Arc<HelperShared>,
) {
    while !shared.is_stopping() {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::time::sleep(STOP_POLL) => continue,
        };

        match accepted {
            Ok(stream) => {
                tracing::debug!("command channel connected");
                if let Err(e) = serve_connection(stream, &dispatcher, &shared).await {
                    tracing::warn!(error = %e, "command channel error");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(STOP_POLL).await;
            }
        }
    }
    tracing::debug!("channel thread stopped");
}

async fn serve_connection(
    mut stream: ChannelStream,
    dispatcher: &Dispatcher,
    shared: &HelperShared,
) -> Result<()> {
    while !shared.is_stopping() {
        let response = match stream.read_line().await? {
            LineRead::Closed => {
                tracing::debug!("command channel closed by host");
                return Ok(());
            }
            LineRead::TooLong => dispatcher.line_too_long(),
            // Sync commands block this thread until the main thread answers; nothing
            // else runs on this runtime.
            LineRead::Line(line) => match dispatcher.handle_line(&line) {
                Some(response) => response,
                None => continue,
            },
        };

        stream.write_line(&response.to_string()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboard_bridge::{BlockHeader, Plane, TransportNames};

    fn args(tag: &str) -> HelperArgs {
        let names = TransportNames {
            channel: format!("ob_srv_pipe_{}", tag),
            shared_block: format!("ob_srv_shm_{}", tag),
            ready_event: format!("ob_srv_rdy_{}", tag),
            done_event: format!("ob_srv_done_{}", tag),
        }
        .for_session(std::process::id() as u64);
        HelperArgs {
            session_id: std::process::id() as u64,
            names,
            max_block_len: 128,
        }
    }

    #[test]
    fn test_new_creates_transport_objects() {
        let args = args("new");
        let server = HelperServer::new(args.clone()).unwrap();

        let block = SharedBlock::open(&args.names.shared_block, 128).unwrap();
        block.write_header(&BlockHeader {
            sample_rate: 44100.0,
            num_samples: 4,
            num_channels: 2,
        });
        assert_eq!(server.block.valid_samples(), 4);

        let ready = SharedEvent::open(&args.names.ready_event, ResetMode::Manual).unwrap();
        ready.set();
        assert!(server.ready.is_set());
    }

    #[test]
    fn test_channel_answers_commands() {
        let args = args("chan");
        let server = HelperServer::new(args.clone()).unwrap();
        let channel = server.spawn_channel_thread().unwrap();

        let mut client = outboard_bridge::transport::CommandChannel::connect(
            &args.names.channel,
            20,
            Duration::from_millis(20),
            1024,
        )
        .unwrap();
        let timeout = Duration::from_secs(2);

        assert_eq!(client.request("show_gui", timeout).unwrap(), "OK");
        assert_eq!(client.request("bogus", timeout).unwrap(), "FAIL unknown command");
        let oversized = "x".repeat(server.max_line_len + 16);
        assert_eq!(client.request(&oversized, timeout).unwrap(), "FAIL line too long");
        assert_eq!(client.request("exit", timeout).unwrap(), "OK EXIT");
        assert!(server.shared.is_stopping());

        server.shutdown([("channel", channel)]);
    }

    #[test]
    fn test_shutdown_stops_audio_thread() {
        let server = HelperServer::new(args("stop")).unwrap();
        let audio = server.spawn_audio_thread().unwrap();

        server.block.write_header(&BlockHeader {
            sample_rate: 48000.0,
            num_samples: 2,
            num_channels: 2,
        });
        server.block.write_plane(Plane::InputLeft, &[0.5, 0.25]).unwrap();
        server.ready.set();
        assert!(server.done.wait(Duration::from_secs(2)));

        let started = Instant::now();
        server.shutdown([("audio", audio)]);
        assert!(started.elapsed() < JOIN_TIMEOUT);
        assert!(server.shared.is_stopping());
    }
}
