//! User-facing notices raised by the registry.

use crate::registry::InstanceKey;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Reported once per configuration; the instance bypasses until it changes.
    LaunchFailed { plugin: PathBuf, reason: String },
    /// First crash of a sequence; the helper is relaunched on the next audio call.
    HelperCrashed { plugin: PathBuf },
    InstanceDisabled { plugin: PathBuf, attempts: u32 },
    /// The helper is alive but did not answer a command.
    HelperUnresponsive { plugin: PathBuf, reason: String },
    /// An editor or state request arrived with no running helper.
    NotRunning,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::LaunchFailed { plugin, reason } => {
                write!(f, "Could not start helper for {}: {}", plugin.display(), reason)
            }
            Notice::HelperCrashed { plugin } => write!(
                f,
                "Helper for {} crashed and will be restarted",
                plugin.display()
            ),
            Notice::InstanceDisabled { plugin, attempts } => write!(
                f,
                "{} crashed {} times in a row and has been disabled. Select the plugin again to retry.",
                plugin.display(),
                attempts
            ),
            Notice::HelperUnresponsive { plugin, reason } => {
                write!(f, "Helper for {} is not responding: {}", plugin.display(), reason)
            }
            Notice::NotRunning => write!(f, "Plugin is not running"),
        }
    }
}

pub trait HostNotifier: Send + Sync {
    fn notify(&self, instance: InstanceKey, notice: &Notice);
}

/// Logs notices; hosts with a UI supply their own notifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl HostNotifier for TracingNotifier {
    fn notify(&self, instance: InstanceKey, notice: &Notice) {
        match notice {
            Notice::LaunchFailed { .. } | Notice::InstanceDisabled { .. } => {
                tracing::error!(%instance, "{}", notice)
            }
            Notice::HelperCrashed { .. } | Notice::HelperUnresponsive { .. } => {
                tracing::warn!(%instance, "{}", notice)
            }
            Notice::NotRunning => tracing::info!(%instance, "{}", notice),
        }
    }
}
