//! Named cross-process signals for the audio handshake.
//!
//! Each event is a small shared file mapped by both processes holding one atomic flag.
//! Waiters poll with a spin, yield, then short-sleep backoff until the flag is raised or
//! the timeout expires.

use crate::error::{BridgeError, Result};
use crate::shared_memory::{create_options, shm_path};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const EVENT_FILE_LEN: u64 = 64;

const SPIN_ITERATIONS: u32 = 64;
const YIELD_ITERATIONS: u32 = 256;
const POLL_INTERVAL: Duration = Duration::from_micros(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Stays raised until someone calls [`SharedEvent::reset`].
    Manual,
    /// A successful wait consumes the signal.
    Auto,
}

pub struct SharedEvent {
    mmap: MmapMut,
    name: String,
    mode: ResetMode,
    owns_memory: bool,
}

impl SharedEvent {
    /// Creates the event in the lowered state.
    pub fn create(name: &str, mode: ResetMode) -> Result<Self> {
        let path = shm_path(name);
        let file = create_options().open(&path).map_err(|e| {
            BridgeError::EventError(format!("Failed to create event {}: {}", name, e))
        })?;
        file.set_len(EVENT_FILE_LEN)
            .map_err(|e| BridgeError::EventError(format!("Failed to size event {}: {}", name, e)))?;

        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| BridgeError::EventError(format!("Failed to map event {}: {}", name, e)))?;

        let event = Self {
            mmap,
            name: name.to_string(),
            mode,
            owns_memory: true,
        };
        event.reset();
        Ok(event)
    }

    pub fn open(name: &str, mode: ResetMode) -> Result<Self> {
        let path = shm_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| BridgeError::EventError(format!("Failed to open event {}: {}", name, e)))?;

        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| BridgeError::EventError(format!("Failed to map event {}: {}", name, e)))?;

        if mmap.len() < std::mem::size_of::<AtomicU32>() {
            return Err(BridgeError::EventError(format!(
                "Event {} has an invalid size",
                name
            )));
        }

        Ok(Self {
            mmap,
            name: name.to_string(),
            mode,
            owns_memory: false,
        })
    }

    fn flag(&self) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned, at least 4 bytes long, and lives as long as
        // self. AtomicU32 has the same layout as u32 and is only accessed atomically.
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU32) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self) {
        self.flag().store(1, Ordering::Release);
    }

    pub fn reset(&self) {
        self.flag().store(0, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag().load(Ordering::Acquire) != 0
    }

    fn try_take(&self) -> bool {
        match self.mode {
            ResetMode::Manual => self.is_set(),
            ResetMode::Auto => self
                .flag()
                .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    /// Returns `true` when signalled before `timeout` elapsed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut iteration: u32 = 0;

        loop {
            if self.try_take() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }

            if iteration < SPIN_ITERATIONS {
                std::hint::spin_loop();
            } else if iteration < SPIN_ITERATIONS + YIELD_ITERATIONS {
                std::thread::yield_now();
            } else {
                std::thread::sleep(POLL_INTERVAL);
            }
            iteration = iteration.saturating_add(1);
        }
    }
}

impl Drop for SharedEvent {
    fn drop(&mut self) {
        if self.owns_memory {
            let _ = std::fs::remove_file(shm_path(&self.name));
        }
    }
}
