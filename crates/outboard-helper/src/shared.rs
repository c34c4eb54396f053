//! State shared by the helper's channel, audio, and main threads.

use crossbeam_channel::{Receiver, Sender};
use outboard_bridge::{HostedPlugin, Response};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SYNC_POLL: Duration = Duration::from_millis(100);

/// Main-thread wakeup reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Queue,
    Sync,
    Stop,
}

/// Slot for the one outstanding main-thread-only request.
#[derive(Default)]
struct SyncState {
    pending: bool,
    result: Option<Response>,
}

pub struct HelperShared {
    stop: AtomicBool,
    queue: Mutex<VecDeque<String>>,
    sync: Mutex<SyncState>,
    sync_cv: Condvar,
    wake_tx: Sender<Wake>,
    /// Owned by the main thread; the audio thread only ever `try_lock`s it.
    pub plugin: Mutex<Option<Box<dyn HostedPlugin>>>,
}

impl HelperShared {
    pub fn new() -> (Self, Receiver<Wake>) {
        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
        let shared = Self {
            stop: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            sync: Mutex::new(SyncState::default()),
            sync_cv: Condvar::new(),
            wake_tx,
            plugin: Mutex::new(None),
        };
        (shared, wake_rx)
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Raises the stop flag and wakes anything blocked on the main thread.
    pub fn request_stop(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.wake_tx.send(Wake::Stop);
        let _guard = self.sync.lock();
        self.sync_cv.notify_all();
    }

    pub fn enqueue(&self, line: String) {
        self.queue.lock().push_back(line);
        let _ = self.wake_tx.send(Wake::Queue);
    }

    pub fn take_queued(&self) -> Vec<String> {
        self.queue.lock().drain(..).collect()
    }

    /// Hands a request to the main thread and blocks until it answers or the helper stops.
    pub fn call_sync(&self) -> Response {
        let mut state = self.sync.lock();
        state.pending = true;
        state.result = None;
        let _ = self.wake_tx.send(Wake::Sync);

        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            if self.is_stopping() {
                state.pending = false;
                return Response::fail("Exiting");
            }
            self.sync_cv.wait_for(&mut state, SYNC_POLL);
        }
    }

    /// Main thread: answers the pending request, if there is one.
    pub fn serve_sync<F>(&self, answer: F)
    where
        F: FnOnce() -> Response,
    {
        if !self.sync.lock().pending {
            return;
        }
        let response = answer();

        let mut state = self.sync.lock();
        state.pending = false;
        state.result = Some(response);
        self.sync_cv.notify_all();
    }
}
