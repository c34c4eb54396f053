//! Plugin capability interface used inside the helper process.
//!
//! The bridge never depends on a concrete plugin technology; a format backend implements
//! [`HostedPlugin`] and exposes it through a [`PluginFactory`].

use crate::Result;
use std::path::Path;

/// One handshake's worth of planar stereo audio.
pub struct StereoBuffer<'a> {
    pub inputs: [&'a [f32]; 2],
    pub outputs: [&'a mut [f32]; 2],
    pub num_samples: usize,
    pub sample_rate: f64,
}

pub trait HostedPlugin: Send {
    fn name(&self) -> &str;

    fn process(&mut self, buffer: &mut StereoBuffer<'_>);

    /// `None` when the plugin has no byte-stream state mechanism at all.
    fn processor_state(&mut self) -> Result<Option<Vec<u8>>>;

    fn controller_state(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set_processor_state(&mut self, data: &[u8]) -> Result<()>;

    fn set_controller_state(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Editable parameters as `(id, normalized value)`.
    fn parameters(&self) -> Vec<(u32, f64)>;

    fn set_parameter(&mut self, id: u32, value: f64) -> Result<()>;

    /// Called after a full state or parameter restore.
    fn state_refreshed(&mut self) {}

    fn open_editor(&mut self) -> Result<()> {
        Ok(())
    }

    fn close_editor(&mut self) {}
}

/// Creates plugin instances on the helper's main thread.
pub trait PluginFactory: Send {
    fn load(&self, path: &Path, sample_rate: f64, block_len: usize) -> Result<Box<dyn HostedPlugin>>;

    /// Processor for standalone helpers, which are themselves the plugin.
    fn load_default(&self, sample_rate: f64, block_len: usize) -> Result<Box<dyn HostedPlugin>>;
}
