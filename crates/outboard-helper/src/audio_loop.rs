//! Helper audio thread: serves one handshake per `ready` signal.

use crate::shared::HelperShared;
use outboard_bridge::{Plane, SharedBlock, SharedEvent, StereoBuffer};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound between stop-flag checks while idle.
pub const READY_WAIT: Duration = Duration::from_millis(1000);

pub struct AudioLoop {
    shared: Arc<HelperShared>,
    block: Arc<SharedBlock>,
    ready: Arc<SharedEvent>,
    done: Arc<SharedEvent>,
    inputs: [Vec<f32>; 2],
    outputs: [Vec<f32>; 2],
}

impl AudioLoop {
    pub fn new(
        shared: Arc<HelperShared>,
        block: Arc<SharedBlock>,
        ready: Arc<SharedEvent>,
        done: Arc<SharedEvent>,
    ) -> Self {
        let len = block.max_block_len();
        Self {
            shared,
            block,
            ready,
            done,
            inputs: [vec![0.0; len], vec![0.0; len]],
            outputs: [vec![0.0; len], vec![0.0; len]],
        }
    }

    pub fn run(&mut self) {
        tracing::debug!("audio thread running");
        loop {
            let signalled = self.ready.wait(READY_WAIT);
            if self.shared.is_stopping() {
                break;
            }
            if !signalled {
                continue;
            }
            self.ready.reset();
            self.serve_block();
        }
        tracing::debug!("audio thread stopped");
    }

    /// Processes the block currently in shared memory and raises `done`.
    ///
    /// Without a plugin, or while the main thread holds it, the input is copied through.
    pub fn serve_block(&mut self) {
        let header = self.block.header();
        let n = self.block.valid_samples();

        let planes = [
            (Plane::InputLeft, Plane::OutputLeft),
            (Plane::InputRight, Plane::OutputRight),
        ];
        for (ch, (input, _)) in planes.iter().enumerate() {
            self.block.read_plane_into(*input, &mut self.inputs[ch][..n]);
        }

        let processed = match self.shared.plugin.try_lock() {
            Some(mut slot) => match slot.as_mut() {
                Some(plugin) => {
                    let [in_l, in_r] = &self.inputs;
                    let [out_l, out_r] = &mut self.outputs;
                    let mut buffer = StereoBuffer {
                        inputs: [&in_l[..n], &in_r[..n]],
                        outputs: [&mut out_l[..n], &mut out_r[..n]],
                        num_samples: n,
                        sample_rate: header.sample_rate,
                    };
                    plugin.process(&mut buffer);
                    true
                }
                None => false,
            },
            None => false,
        };

        if !processed {
            for ch in 0..2 {
                self.outputs[ch][..n].copy_from_slice(&self.inputs[ch][..n]);
            }
        }

        for (ch, (_, output)) in planes.iter().enumerate() {
            if let Err(e) = self.block.write_plane(*output, &self.outputs[ch][..n]) {
                tracing::warn!(error = %e, "failed to write output plane");
            }
        }

        self.done.set();
    }
}
