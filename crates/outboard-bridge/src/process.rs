//! Helper process handle.

use crate::config::SessionNames;
use crate::error::Result;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Exit code, `None` when terminated by a signal.
    Exited(Option<i32>),
}

/// Owns a spawned helper. Dropping it kills the process if it is still running.
pub struct HelperProcess {
    child: Mutex<Child>,
    pid: u32,
    executable: PathBuf,
}

impl HelperProcess {
    /// Command-line arguments the helper expects.
    pub fn args(session_id: u64, names: &SessionNames, max_block_len: usize) -> Vec<String> {
        vec![
            "-uid".to_string(),
            session_id.to_string(),
            "-pipe".to_string(),
            names.channel.clone(),
            "-shm".to_string(),
            names.shared_block.clone(),
            "-event_ready".to_string(),
            names.ready_event.clone(),
            "-event_done".to_string(),
            names.done_event.clone(),
            "-block".to_string(),
            max_block_len.to_string(),
        ]
    }

    pub fn spawn(
        executable: &Path,
        session_id: u64,
        names: &SessionNames,
        max_block_len: usize,
    ) -> Result<Self> {
        let child = Command::new(executable)
            .args(Self::args(session_id, names, max_block_len))
            .stdin(Stdio::null())
            .spawn()?;

        let pid = child.id();
        tracing::info!(pid, session_id, executable = %executable.display(), "helper spawned");

        Ok(Self {
            child: Mutex::new(child),
            pid,
            executable: executable.to_path_buf(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Asks the OS every time; nothing is cached.
    pub fn liveness(&self) -> Liveness {
        match self.child.lock().try_wait() {
            Ok(None) => Liveness::Alive,
            Ok(Some(status)) => Liveness::Exited(status.code()),
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "exit status query failed");
                Liveness::Exited(None)
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.liveness() == Liveness::Alive
    }

    /// Polls for exit until `timeout`. Returns `true` if the process is gone.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Waits up to `grace` for a voluntary exit, then kills.
    pub fn terminate(&self, grace: Duration) {
        if self.wait_for_exit(grace) {
            return;
        }
        tracing::warn!(pid = self.pid, "helper ignored exit request, killing");
        self.kill();
    }

    pub fn kill(&self) {
        let mut child = self.child.lock();
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        let child = self.child.get_mut();
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
