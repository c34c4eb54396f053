//! Audio block codec.
//!
//! Moves the host's interleaved 16-bit PCM through the shared block one chunk at a time:
//! de-interleave and convert to `f32`, hand over with ready/done, then clamp, convert back
//! and re-interleave.

use crate::event::SharedEvent;
use crate::shared_memory::{BlockHeader, Plane, SharedBlock};
use std::time::Duration;

/// The host's end of a handshake.
pub trait HandshakePeer {
    fn block(&self) -> &SharedBlock;
    fn ready(&self) -> &SharedEvent;
    fn done(&self) -> &SharedEvent;
    /// Must query the process every time.
    fn is_alive(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Processed { chunks: usize },
    /// A chunk timed out while the helper was alive. Output from that chunk on is the input.
    Bypassed { chunks_processed: usize },
    /// The helper died during the call. Output from the failed chunk on is the input.
    Aborted { chunks_processed: usize },
}

impl BlockOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, BlockOutcome::Processed { .. })
    }
}

#[inline]
pub fn sample_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

#[inline]
pub fn f32_to_sample(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Chunk sizes for `frames` samples through a block of `max_len`.
pub fn chunk_sizes(frames: usize, max_len: usize) -> impl Iterator<Item = usize> {
    let max_len = max_len.max(1);
    (0..frames)
        .step_by(max_len)
        .map(move |start| max_len.min(frames - start))
}

/// Per-instance staging buffers, sized once for the block length.
pub struct BlockCodec {
    in_left: Vec<f32>,
    in_right: Vec<f32>,
    out_left: Vec<f32>,
    out_right: Vec<f32>,
}

impl BlockCodec {
    pub fn new(max_block_len: usize) -> Self {
        Self {
            in_left: vec![0.0; max_block_len],
            in_right: vec![0.0; max_block_len],
            out_left: vec![0.0; max_block_len],
            out_right: vec![0.0; max_block_len],
        }
    }

    /// Processes `input` into `output` (same length, `channels`-interleaved).
    ///
    /// Output always ends up fully written: processed chunks come from the helper, the rest
    /// is a copy of the input. Channels beyond the first two are passed through.
    pub fn process<P: HandshakePeer + ?Sized>(
        &mut self,
        peer: &P,
        input: &[i16],
        output: &mut [i16],
        channels: usize,
        sample_rate: f64,
        timeout: Duration,
    ) -> BlockOutcome {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);

        if channels == 0 {
            return BlockOutcome::Processed { chunks: 0 };
        }

        let block = peer.block();
        let max_len = block.max_block_len().min(self.in_left.len());
        let frames = len / channels;
        let planes = channels.min(2);

        let mut start = 0;
        let mut chunk = 0;
        for n in chunk_sizes(frames, max_len) {
            let base = start * channels;

            for i in 0..n {
                let frame = &input[base + i * channels..];
                let left = sample_to_f32(frame[0]);
                self.in_left[i] = left;
                self.in_right[i] = if planes == 2 {
                    sample_to_f32(frame[1])
                } else {
                    left
                };
            }

            block.write_header(&BlockHeader {
                sample_rate,
                num_samples: n as i32,
                num_channels: channels as i32,
            });
            let written = block
                .write_plane(Plane::InputLeft, &self.in_left[..n])
                .and_then(|_| block.write_plane(Plane::InputRight, &self.in_right[..n]));
            if let Err(e) = written {
                tracing::warn!(chunk, error = %e, "failed to stage chunk, bypassing");
                return BlockOutcome::Bypassed {
                    chunks_processed: chunk,
                };
            }

            peer.done().reset();
            peer.ready().set();

            if !peer.done().wait(timeout) {
                if !peer.is_alive() {
                    tracing::warn!(chunk, "helper died during handshake, aborting call");
                    return BlockOutcome::Aborted {
                        chunks_processed: chunk,
                    };
                }
                tracing::warn!(
                    chunk,
                    timeout_ms = timeout.as_millis() as u64,
                    "handshake timed out, bypassing rest of call"
                );
                return BlockOutcome::Bypassed {
                    chunks_processed: chunk,
                };
            }

            block.read_plane_into(Plane::OutputLeft, &mut self.out_left[..n]);
            block.read_plane_into(Plane::OutputRight, &mut self.out_right[..n]);

            for i in 0..n {
                let frame = &mut output[base + i * channels..];
                if planes == 2 {
                    frame[0] = f32_to_sample(self.out_left[i]);
                    frame[1] = f32_to_sample(self.out_right[i]);
                } else {
                    let left = self.out_left[i].clamp(-1.0, 1.0);
                    let right = self.out_right[i].clamp(-1.0, 1.0);
                    frame[0] = f32_to_sample((left + right) * 0.5);
                }
            }

            start += n;
            chunk += 1;
        }

        BlockOutcome::Processed { chunks: chunk }
    }
}
