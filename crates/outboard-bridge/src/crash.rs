//! Crash-loop accounting for one instance.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashVerdict {
    /// Relaunch on the next audio call. `first_in_sequence` is set when the user should be told.
    Restart { first_in_sequence: bool },
    /// Too many crashes inside the window; stop relaunching.
    Disable,
}

#[derive(Debug, Clone)]
pub struct CrashTracker {
    restart_attempts: u32,
    last_crash: Option<Instant>,
    window: Duration,
    threshold: u32,
}

impl CrashTracker {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            restart_attempts: 0,
            last_crash: None,
            window,
            threshold: threshold.max(1),
        }
    }

    pub fn restart_attempts(&self) -> u32 {
        self.restart_attempts
    }

    pub fn last_crash(&self) -> Option<Instant> {
        self.last_crash
    }

    pub fn record_crash(&mut self, now: Instant) -> CrashVerdict {
        let within_window = self
            .last_crash
            .is_some_and(|last| now.saturating_duration_since(last) < self.window);

        self.restart_attempts = if within_window {
            self.restart_attempts.saturating_add(1)
        } else {
            1
        };
        self.last_crash = Some(now);

        if self.restart_attempts >= self.threshold {
            CrashVerdict::Disable
        } else {
            CrashVerdict::Restart {
                first_in_sequence: self.restart_attempts == 1,
            }
        }
    }
}
