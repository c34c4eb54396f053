//! Fixtures for the end-to-end suite.
//!
//! Every test drives the real `outboard-helper` binary through a [`BridgeRegistry`]; plugin
//! paths like `gain.builtin` select the helper's built-in processors.

pub mod tolerances;

use outboard::bridge::{HostNotifier, Notice};
use outboard::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Interleaved stereo frames per host call
pub const TEST_FRAMES: usize = 512;

/// Upper bound for anything that waits on helper start-up or plugin loading.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

pub fn helper_executable() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_outboard-helper"))
}

/// Config that maps `.builtin` plugin paths to the freshly built helper.
pub fn test_config() -> BridgeConfig {
    let helper = helper_executable();
    let helper_dir = helper
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let helper_name = helper
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "outboard-helper".to_string());

    let mut config = BridgeConfig::default().map_extension("builtin", helper_name);
    config.helper_dir = helper_dir;
    config.handshake_timeout_ms = 250;
    config.exit_grace_ms = 1000;
    config
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(InstanceKey, Notice)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Notice) -> bool) -> usize {
        self.notices().iter().filter(|n| matches(n)).count()
    }
}

impl HostNotifier for RecordingNotifier {
    fn notify(&self, instance: InstanceKey, notice: &Notice) {
        self.notices.lock().unwrap().push((instance, notice.clone()));
    }
}

pub fn test_registry(config: BridgeConfig) -> (BridgeRegistry, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = BridgeRegistry::new(config)
        .expect("test config must validate")
        .with_notifier(notifier.clone());
    (registry, notifier)
}

/// Interleaved stereo ramp, left positive and right negative, well inside the i16 range.
pub fn stereo_ramp(frames: usize) -> Vec<i16> {
    (0..frames)
        .flat_map(|i| {
            let v = ((i % 200) as i16 + 1) * 40;
            [v, -v]
        })
        .collect()
}

/// One host audio call; returns the outcome and the output block.
pub fn run_block(
    registry: &BridgeRegistry,
    key: InstanceKey,
    instance: &InstanceConfig,
    input: &[i16],
) -> (ProcessOutcome, Vec<i16>) {
    let mut output = vec![0i16; input.len()];
    let outcome = registry.process(key, instance, input, &mut output, 2, TEST_SAMPLE_RATE);
    (outcome, output)
}

/// Keeps feeding blocks until `done` accepts a result or the deadline passes.
pub fn process_until(
    registry: &BridgeRegistry,
    key: InstanceKey,
    instance: &InstanceConfig,
    input: &[i16],
    mut done: impl FnMut(&ProcessOutcome, &[i16]) -> bool,
) -> Option<(ProcessOutcome, Vec<i16>)> {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while Instant::now() < deadline {
        let (outcome, output) = run_block(registry, key, instance, input);
        if done(&outcome, &output) {
            return Some((outcome, output));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    None
}

/// Max absolute difference between `output` and `input * gain`.
pub fn gain_error(input: &[i16], output: &[i16], gain: f32) -> i32 {
    input
        .iter()
        .zip(output)
        .map(|(&i, &o)| ((i as f32 * gain).round() as i32 - o as i32).abs())
        .max()
        .unwrap_or(0)
}
