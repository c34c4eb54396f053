//! Out-of-process audio plugin bridge, host side.
//!
//! Each plugin instance runs inside a helper process. The host talks to it over a
//! line-based command channel and streams audio through a shared block guarded by a
//! ready/done handshake. A crashing helper is relaunched, and disabled after repeated
//! crashes; every failure degrades to pass-through audio instead of an error.
//!
//! The helper side lives in `outboard-helper`; both share the transport, protocol and
//! state types defined here.
//!
//! ## Usage
//!
//! ```ignore
//! use outboard_bridge::{BridgeConfig, BridgeRegistry, InstanceConfig, InstanceKey};
//!
//! let config = BridgeConfig::default().map_extension("vst3", "vst3-helper");
//! let registry = BridgeRegistry::new(config)?;
//!
//! let instance = InstanceConfig::new("/plugins/Reverb.vst3");
//! // once per host audio block
//! registry.process(InstanceKey(1), &instance, &input, &mut output, 2, 48000.0);
//! ```

pub mod error;
pub use error::{BridgeError, LaunchStage, Result};

mod config;
pub use config::{BridgeConfig, SessionNames, TransportNames};

pub mod codec;
pub use codec::{BlockCodec, BlockOutcome, HandshakePeer};

mod crash;
pub use crash::{CrashTracker, CrashVerdict};

#[doc(hidden)]
pub mod event;
pub use event::{ResetMode, SharedEvent};

mod instance;
pub use instance::{HostedPlugin, PluginFactory, StereoBuffer};

mod notify;
pub use notify::{HostNotifier, Notice, TracingNotifier};

mod process;
pub use process::{HelperProcess, Liveness};

pub mod protocol;
pub use protocol::{Command, CommandClass, CommandKind, Response};

mod registry;
pub use registry::{BridgeRegistry, EditorToggle, InstanceConfig, InstanceKey};

mod resolver;
pub use resolver::{HelperLaunch, HelperResolver, LaunchMode, MappingResolver};

mod session;
pub use session::HelperSession;

#[doc(hidden)]
pub mod shared_memory;
pub use shared_memory::{BlockHeader, Plane, SharedBlock};

pub mod state;
pub use state::{capture_state, restore_state, StateToken};

mod supervisor;
pub use supervisor::{
    next_session_id, BypassReason, EntryState, InstanceStatus, ProcessOutcome, Supervisor,
};

#[doc(hidden)]
pub mod transport;
