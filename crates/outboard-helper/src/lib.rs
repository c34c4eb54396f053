//! Helper process side of the outboard bridge.
//!
//! A helper hosts exactly one plugin for one host instance. [`HelperServer::run`] creates the
//! session's shared block and events, listens on the command channel, and serves audio
//! handshakes until the host sends `exit`.
//!
//! ```ignore
//! use outboard_helper::{BuiltinFactory, HelperArgs, HelperServer};
//!
//! let args = HelperArgs::parse(std::env::args().skip(1))?;
//! HelperServer::run(args, Box::new(BuiltinFactory))?;
//! ```

mod args;
pub use args::HelperArgs;

mod audio_loop;
pub use audio_loop::AudioLoop;

pub mod builtin;
pub use builtin::BuiltinFactory;

mod dispatcher;
pub use dispatcher::Dispatcher;

mod main_thread;
pub use main_thread::MainThread;

mod server;
pub use server::HelperServer;

mod shared;
pub use shared::{HelperShared, Wake};
