//! Tolerance constants for bridged audio.
//!
//! Samples cross the bridge as `i16 -> f32 -> i16`; the scale factors differ by one step
//! (1/32768 in, 32767 out) and the return conversion truncates.

/// Exact operations (pass-through, unity gain), in i16 steps.
pub const PASSTHROUGH_STEPS: i32 = 1;

/// Gain stages, in i16 steps.
pub const GAIN_STEPS: i32 = 2;
