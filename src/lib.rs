//! # Outboard - out-of-process audio plugin bridge
//!
//! Runs each plugin instance inside its own helper process so a crashing or hanging plugin
//! never takes the host down.
//!
//! ## Architecture
//!
//! Outboard is an umbrella crate over:
//! - **outboard-bridge** - host side: helper supervision, crash tracking, the audio block
//!   codec and the wire types both sides share
//! - **outboard-helper** - helper side: command dispatcher, main-thread executor, audio
//!   handshake loop and the built-in processors (shipped as the `outboard-helper` binary)
//!
//! ## Quick Start
//!
//! ```ignore
//! use outboard::prelude::*;
//!
//! let config = BridgeConfig::default().map_extension("vst3", "outboard-helper");
//! let registry = BridgeRegistry::new(config)?;
//!
//! let mut instance = InstanceConfig::new("/plugins/Reverb.vst3");
//! // once per host audio block; failures degrade to pass-through
//! registry.process(InstanceKey(1), &instance, &input, &mut output, 2, 48000.0);
//!
//! // before persisting the project
//! if let Some(state) = registry.save_state_if_editor_visible(InstanceKey(1)) {
//!     instance.state = state;
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - host side plus the helper
//! - `bridge` - host side only (always enabled)
//! - `helper` - helper process side and the `outboard-helper` binary

pub mod error;
pub use error::{Error, Result};

/// Re-export of outboard-bridge for direct access
pub use outboard_bridge as bridge;

#[cfg(feature = "helper")]
pub use outboard_helper as helper;

pub use outboard_bridge::{
    BridgeConfig, BridgeError, BridgeRegistry, BypassReason, EditorToggle, EntryState,
    HostNotifier, HostedPlugin, InstanceConfig, InstanceKey, InstanceStatus, LaunchStage,
    MappingResolver, Notice, PluginFactory, ProcessOutcome, StateToken, StereoBuffer,
    TracingNotifier,
};

#[cfg(feature = "helper")]
pub use outboard_helper::{BuiltinFactory, HelperArgs, HelperServer};

pub mod prelude {
    pub use crate::{Error, Result};

    pub use outboard_bridge::{
        BridgeConfig, BridgeRegistry, BypassReason, EditorToggle, InstanceConfig, InstanceKey,
        ProcessOutcome,
    };

    #[cfg(feature = "helper")]
    pub use outboard_helper::{BuiltinFactory, HelperArgs, HelperServer};
}
