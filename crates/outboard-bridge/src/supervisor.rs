//! Per-instance helper supervision.
//!
//! A [`Supervisor`] owns at most one [`HelperSession`] and drives
//! `Idle → Launching → Connected`, crash accounting, and the absorbing `Disabled` and
//! `LaunchFailed` states. Its lock is only held for flag and pointer updates; launching,
//! handshakes and teardown happen outside it.

use crate::codec::{BlockCodec, BlockOutcome};
use crate::config::BridgeConfig;
use crate::crash::{CrashTracker, CrashVerdict};
use crate::error::Result;
use crate::notify::{HostNotifier, Notice};
use crate::process::Liveness;
use crate::protocol::Command;
use crate::registry::InstanceKey;
use crate::resolver::{HelperResolver, LaunchMode};
use crate::session::HelperSession;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `(millisecond tick << 32) | (pid & 0xFFFF) << 16 | (counter & 0xFFFF)`.
///
/// The counter keeps ids distinct within one host run; tick and pid separate runs.
pub fn next_session_id() -> u64 {
    let tick = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0) as u64;
    let pid = (std::process::id() & 0xFFFF) as u64;
    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (tick << 32) | (pid << 16) | counter
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Idle,
    Launching,
    Connected,
    /// Launch or transport setup failed; bypass until the configuration changes.
    LaunchFailed,
    /// Crash threshold reached; bypass until the plugin is selected again.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    NotConfigured,
    Launching,
    LaunchFailed,
    /// Crash detected on this call; the next call relaunches.
    Crashed,
    Disabled,
    /// The helper is alive but missed the handshake deadline.
    Timeout,
    /// The helper died during this call.
    HelperDied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    Bypassed(BypassReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStatus {
    pub state: EntryState,
    pub editor_visible: bool,
    pub restart_attempts: u32,
}

/// Everything a supervisor borrows from its registry.
pub struct LaunchContext<'a> {
    pub key: InstanceKey,
    pub config: &'a BridgeConfig,
    pub resolver: &'a dyn HelperResolver,
    pub notifier: &'a dyn HostNotifier,
}

impl LaunchContext<'_> {
    fn notify(&self, notice: Option<Notice>) {
        if let Some(notice) = notice {
            self.notifier.notify(self.key, &notice);
        }
    }
}

struct EntryInner {
    state: EntryState,
    session: Option<Arc<HelperSession>>,
    editor_visible: bool,
    crashes: CrashTracker,
    retired: bool,
}

enum Step {
    Ready(Arc<HelperSession>),
    Bypass(BypassReason),
    Launch,
}

pub struct Supervisor {
    plugin: PathBuf,
    inner: Mutex<EntryInner>,
    codec: Mutex<BlockCodec>,
}

impl Supervisor {
    pub fn new(plugin: PathBuf, config: &BridgeConfig) -> Self {
        Self {
            plugin,
            inner: Mutex::new(EntryInner {
                state: EntryState::Idle,
                session: None,
                editor_visible: false,
                crashes: CrashTracker::new(config.crash_window(), config.max_restart_attempts),
                retired: false,
            }),
            codec: Mutex::new(BlockCodec::new(config.max_block_len)),
        }
    }

    pub fn plugin(&self) -> &Path {
        &self.plugin
    }

    pub fn status(&self) -> InstanceStatus {
        let inner = self.inner.lock();
        InstanceStatus {
            state: inner.state,
            editor_visible: inner.editor_visible,
            restart_attempts: inner.crashes.restart_attempts(),
        }
    }

    /// Connected session, if any. Liveness is not checked.
    pub fn session(&self) -> Option<Arc<HelperSession>> {
        let inner = self.inner.lock();
        match inner.state {
            EntryState::Connected => inner.session.clone(),
            _ => None,
        }
    }

    pub fn editor_visible(&self) -> bool {
        self.inner.lock().editor_visible
    }

    pub fn set_editor_visible(&self, visible: bool) {
        self.inner.lock().editor_visible = visible;
    }

    /// Makes sure a live, connected helper exists, launching one if needed.
    pub fn ensure_running(
        &self,
        ctx: &LaunchContext<'_>,
        state_token: &str,
        sample_rate: f64,
    ) -> std::result::Result<Arc<HelperSession>, BypassReason> {
        let mut released = None;
        let mut notice = None;

        let step = {
            let mut inner = self.inner.lock();
            match inner.state {
                EntryState::Disabled => Step::Bypass(BypassReason::Disabled),
                EntryState::LaunchFailed => Step::Bypass(BypassReason::LaunchFailed),
                EntryState::Launching => Step::Bypass(BypassReason::Launching),
                EntryState::Connected => match inner.session.clone() {
                    Some(session) if session.liveness() == Liveness::Alive => Step::Ready(session),
                    _ => {
                        let (session, crash_notice) = self.record_crash(&mut inner, Instant::now());
                        released = session;
                        notice = crash_notice;
                        Step::Bypass(BypassReason::Crashed)
                    }
                },
                EntryState::Idle => {
                    inner.state = EntryState::Launching;
                    Step::Launch
                }
            }
        };

        drop(released);
        ctx.notify(notice);

        match step {
            Step::Ready(session) => Ok(session),
            Step::Bypass(reason) => Err(reason),
            Step::Launch => self.finish_launch(ctx, self.launch(ctx, state_token, sample_rate)),
        }
    }

    fn launch(
        &self,
        ctx: &LaunchContext<'_>,
        state_token: &str,
        sample_rate: f64,
    ) -> Result<Arc<HelperSession>> {
        let launch = ctx.resolver.resolve(&self.plugin)?;
        let session_id = next_session_id();
        let block_len = ctx.config.max_block_len;
        let state = match state_token.trim() {
            "" | "EMPTY" => None,
            token => Some(token.to_string()),
        };

        let init = match (launch.mode, state) {
            (LaunchMode::Mapped, None) => Command::LoadPlugin {
                path: self.plugin.clone(),
                sample_rate,
                block_len,
            },
            (LaunchMode::Mapped, Some(state)) => Command::LoadAndSetState {
                path: self.plugin.clone(),
                sample_rate,
                block_len,
                state,
            },
            (LaunchMode::Standalone, None) => Command::Init {
                sample_rate,
                block_len,
            },
            (LaunchMode::Standalone, Some(state)) => Command::InitWithState {
                sample_rate,
                block_len,
                state,
            },
        };

        tracing::info!(
            instance = %ctx.key,
            session_id,
            plugin = %self.plugin.display(),
            helper = %launch.executable.display(),
            "launching helper"
        );

        HelperSession::launch(&launch.executable, &self.plugin, session_id, ctx.config, &init)
            .map(Arc::new)
    }

    fn finish_launch(
        &self,
        ctx: &LaunchContext<'_>,
        launched: Result<Arc<HelperSession>>,
    ) -> std::result::Result<Arc<HelperSession>, BypassReason> {
        let mut inner = self.inner.lock();

        if inner.retired {
            // Removed while launching; the session is released outside the lock.
            drop(inner);
            drop(launched);
            return Err(BypassReason::NotConfigured);
        }

        match launched {
            Ok(session) => {
                inner.state = EntryState::Connected;
                inner.editor_visible = false;
                inner.session = Some(Arc::clone(&session));
                Ok(session)
            }
            Err(e) => {
                inner.state = EntryState::LaunchFailed;
                drop(inner);
                tracing::error!(instance = %ctx.key, error = %e, "helper launch failed");
                ctx.notify(Some(Notice::LaunchFailed {
                    plugin: self.plugin.clone(),
                    reason: e.to_string(),
                }));
                Err(BypassReason::LaunchFailed)
            }
        }
    }

    fn record_crash(
        &self,
        inner: &mut EntryInner,
        now: Instant,
    ) -> (Option<Arc<HelperSession>>, Option<Notice>) {
        let session = inner.session.take();
        inner.editor_visible = false;

        match inner.crashes.record_crash(now) {
            CrashVerdict::Disable => {
                inner.state = EntryState::Disabled;
                let attempts = inner.crashes.restart_attempts();
                tracing::error!(plugin = %self.plugin.display(), attempts, "helper disabled after repeated crashes");
                (
                    session,
                    Some(Notice::InstanceDisabled {
                        plugin: self.plugin.clone(),
                        attempts,
                    }),
                )
            }
            CrashVerdict::Restart { first_in_sequence } => {
                inner.state = EntryState::Idle;
                tracing::warn!(
                    plugin = %self.plugin.display(),
                    attempts = inner.crashes.restart_attempts(),
                    "helper crashed, will relaunch"
                );
                let notice = first_in_sequence.then(|| Notice::HelperCrashed {
                    plugin: self.plugin.clone(),
                });
                (session, notice)
            }
        }
    }

    /// Runs one host audio call. `output` is always fully written.
    pub fn process(
        &self,
        ctx: &LaunchContext<'_>,
        state_token: &str,
        input: &[i16],
        output: &mut [i16],
        channels: usize,
        sample_rate: f64,
    ) -> ProcessOutcome {
        let session = match self.ensure_running(ctx, state_token, sample_rate) {
            Ok(session) => session,
            Err(reason) => {
                bypass(input, output);
                return ProcessOutcome::Bypassed(reason);
            }
        };

        let outcome = self.codec.lock().process(
            &*session,
            input,
            output,
            channels,
            sample_rate,
            ctx.config.handshake_timeout(),
        );

        match outcome {
            BlockOutcome::Processed { .. } => ProcessOutcome::Processed,
            BlockOutcome::Bypassed { .. } => ProcessOutcome::Bypassed(BypassReason::Timeout),
            BlockOutcome::Aborted { .. } => ProcessOutcome::Bypassed(BypassReason::HelperDied),
        }
    }

    /// Detaches the session so the entry can be dropped; the caller releases it.
    pub fn retire(&self) -> Option<Arc<HelperSession>> {
        let mut inner = self.inner.lock();
        inner.retired = true;
        inner.editor_visible = false;
        inner.session.take()
    }
}

pub(crate) fn bypass(input: &[i16], output: &mut [i16]) {
    let len = input.len().min(output.len());
    output[..len].copy_from_slice(&input[..len]);
}
