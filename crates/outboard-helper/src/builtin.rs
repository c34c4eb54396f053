//! Built-in processors.
//!
//! Selected by the plugin path's file stem, so `/anywhere/gain.builtin` loads [`GainPlugin`].
//! They stand in for real plugin formats, which plug in through [`PluginFactory`].

use outboard_bridge::{BridgeError, HostedPlugin, PluginFactory, Result, StereoBuffer};
use std::path::Path;
use std::time::Duration;

/// Longer than the default handshake timeout.
const STALL_DURATION: Duration = Duration::from_millis(750);

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFactory;

impl BuiltinFactory {
    pub fn by_name(name: &str) -> Option<Box<dyn HostedPlugin>> {
        let plugin: Box<dyn HostedPlugin> = match name {
            "gain" => Box::new(GainPlugin::default()),
            "passthrough" => Box::new(PassthroughPlugin),
            "polarity" => Box::new(PolarityPlugin::default()),
            "stall" => Box::new(StallPlugin),
            "crash" => Box::new(CrashPlugin),
            _ => return None,
        };
        Some(plugin)
    }
}

impl PluginFactory for BuiltinFactory {
    fn load(&self, path: &Path, sample_rate: f64, block_len: usize) -> Result<Box<dyn HostedPlugin>> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let plugin = Self::by_name(&stem).ok_or_else(|| {
            BridgeError::PluginLoad(format!("no built-in processor named '{}'", stem))
        })?;

        tracing::info!(plugin = plugin.name(), sample_rate, block_len, "built-in processor loaded");
        Ok(plugin)
    }

    fn load_default(&self, sample_rate: f64, block_len: usize) -> Result<Box<dyn HostedPlugin>> {
        tracing::info!(sample_rate, block_len, "default processor loaded");
        Ok(Box::new(GainPlugin::default()))
    }
}

fn copy_through(buffer: &mut StereoBuffer<'_>) {
    let n = buffer.num_samples;
    for ch in 0..2 {
        buffer.outputs[ch][..n].copy_from_slice(&buffer.inputs[ch][..n]);
    }
}

/// Parameter 0 is the normalized gain; 0.5 is unity, 1.0 is +6 dB.
#[derive(Debug, Clone)]
pub struct GainPlugin {
    gain: f64,
    editor_open: bool,
}

impl Default for GainPlugin {
    fn default() -> Self {
        Self {
            gain: 0.5,
            editor_open: false,
        }
    }
}

impl GainPlugin {
    pub fn gain(&self) -> f64 {
        self.gain
    }

    fn factor(&self) -> f32 {
        (self.gain * 2.0) as f32
    }
}

impl HostedPlugin for GainPlugin {
    fn name(&self) -> &str {
        "gain"
    }

    fn process(&mut self, buffer: &mut StereoBuffer<'_>) {
        let n = buffer.num_samples;
        let factor = self.factor();
        for ch in 0..2 {
            for (out, &input) in buffer.outputs[ch][..n].iter_mut().zip(&buffer.inputs[ch][..n]) {
                *out = input * factor;
            }
        }
    }

    fn processor_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.gain.to_le_bytes().to_vec()))
    }

    fn controller_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(vec![self.editor_open as u8]))
    }

    fn set_processor_state(&mut self, data: &[u8]) -> Result<()> {
        let bytes: [u8; 8] = data.try_into().map_err(|_| {
            BridgeError::StateRestore(format!("gain state must be 8 bytes, got {}", data.len()))
        })?;
        self.set_parameter(0, f64::from_le_bytes(bytes))
    }

    fn set_controller_state(&mut self, _data: &[u8]) -> Result<()> {
        // editor visibility is owned by the host
        Ok(())
    }

    fn parameters(&self) -> Vec<(u32, f64)> {
        vec![(0, self.gain)]
    }

    fn set_parameter(&mut self, id: u32, value: f64) -> Result<()> {
        if id != 0 {
            return Err(BridgeError::StateRestore(format!("gain has no parameter {}", id)));
        }
        if !value.is_finite() {
            return Err(BridgeError::StateRestore("gain must be finite".to_string()));
        }
        self.gain = value.clamp(0.0, 1.0);
        Ok(())
    }

    fn open_editor(&mut self) -> Result<()> {
        self.editor_open = true;
        Ok(())
    }

    fn close_editor(&mut self) {
        self.editor_open = false;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPlugin;

impl HostedPlugin for PassthroughPlugin {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn process(&mut self, buffer: &mut StereoBuffer<'_>) {
        copy_through(buffer);
    }

    fn processor_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(Vec::new()))
    }

    fn set_processor_state(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> Vec<(u32, f64)> {
        Vec::new()
    }

    fn set_parameter(&mut self, id: u32, _value: f64) -> Result<()> {
        Err(BridgeError::StateRestore(format!(
            "passthrough has no parameter {}",
            id
        )))
    }
}

/// Parameters 0 and 1 invert the left and right channel when at or above 0.5.
///
/// Has no byte-stream state, so its state travels as a parameter list.
#[derive(Debug, Default, Clone)]
pub struct PolarityPlugin {
    invert: [f64; 2],
    refreshes: usize,
}

impl PolarityPlugin {
    pub fn refreshes(&self) -> usize {
        self.refreshes
    }
}

impl HostedPlugin for PolarityPlugin {
    fn name(&self) -> &str {
        "polarity"
    }

    fn process(&mut self, buffer: &mut StereoBuffer<'_>) {
        let n = buffer.num_samples;
        for ch in 0..2 {
            let sign = if self.invert[ch] >= 0.5 { -1.0 } else { 1.0 };
            for (out, &input) in buffer.outputs[ch][..n].iter_mut().zip(&buffer.inputs[ch][..n]) {
                *out = input * sign;
            }
        }
    }

    fn processor_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set_processor_state(&mut self, _data: &[u8]) -> Result<()> {
        Err(BridgeError::StateRestore(
            "polarity has no byte-stream state".to_string(),
        ))
    }

    fn parameters(&self) -> Vec<(u32, f64)> {
        vec![(0, self.invert[0]), (1, self.invert[1])]
    }

    fn set_parameter(&mut self, id: u32, value: f64) -> Result<()> {
        let slot = self.invert.get_mut(id as usize).ok_or_else(|| {
            BridgeError::StateRestore(format!("polarity has no parameter {}", id))
        })?;
        *slot = value.clamp(0.0, 1.0);
        Ok(())
    }

    fn state_refreshed(&mut self) {
        self.refreshes += 1;
    }
}

/// Blocks each handshake past the deadline, leaving the process alive.
#[derive(Debug, Default, Clone, Copy)]
pub struct StallPlugin;

impl HostedPlugin for StallPlugin {
    fn name(&self) -> &str {
        "stall"
    }

    fn process(&mut self, buffer: &mut StereoBuffer<'_>) {
        std::thread::sleep(STALL_DURATION);
        copy_through(buffer);
    }

    fn processor_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(Vec::new()))
    }

    fn set_processor_state(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> Vec<(u32, f64)> {
        Vec::new()
    }

    fn set_parameter(&mut self, _id: u32, _value: f64) -> Result<()> {
        Ok(())
    }
}

/// Takes the whole helper down on the first processed block.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrashPlugin;

impl HostedPlugin for CrashPlugin {
    fn name(&self) -> &str {
        "crash"
    }

    fn process(&mut self, _buffer: &mut StereoBuffer<'_>) {
        tracing::error!("crash processor aborting helper");
        std::process::abort();
    }

    fn processor_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(Vec::new()))
    }

    fn set_processor_state(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> Vec<(u32, f64)> {
        Vec::new()
    }

    fn set_parameter(&mut self, _id: u32, _value: f64) -> Result<()> {
        Ok(())
    }
}
