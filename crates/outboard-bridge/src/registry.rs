//! Instance registry: the host-facing entry point.
//!
//! Owns one [`Supervisor`] per instance key. The map lock only guards insertion and
//! removal; sessions are always released after it is dropped.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::notify::{HostNotifier, Notice, TracingNotifier};
use crate::protocol::{Command, Response};
use crate::resolver::{HelperResolver, MappingResolver};
use crate::session::HelperSession;
use crate::supervisor::{
    bypass, BypassReason, InstanceStatus, LaunchContext, ProcessOutcome, Supervisor,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One logical plugin slot in the host (e.g. one timeline object's filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey(pub u64);

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host-persisted configuration for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Empty when no plugin is selected.
    pub plugin_path: PathBuf,
    /// Encoded state token; empty when there is nothing to restore.
    pub state: String,
}

impl InstanceConfig {
    pub fn new(plugin_path: impl Into<PathBuf>) -> Self {
        Self {
            plugin_path: plugin_path.into(),
            state: String::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.plugin_path.as_os_str().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorToggle {
    Shown,
    /// `state` is the token captured after closing, `None` if the capture failed.
    Hidden { state: Option<String> },
    Refused,
}

pub struct BridgeRegistry {
    config: BridgeConfig,
    resolver: Box<dyn HelperResolver>,
    notifier: Arc<dyn HostNotifier>,
    entries: Mutex<HashMap<InstanceKey, Arc<Supervisor>>>,
}

impl BridgeRegistry {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let resolver = Box::new(MappingResolver::from_config(&config));
        Ok(Self::with_parts(config, resolver, Arc::new(TracingNotifier)))
    }

    pub fn with_parts(
        config: BridgeConfig,
        resolver: Box<dyn HelperResolver>,
        notifier: Arc<dyn HostNotifier>,
    ) -> Self {
        Self {
            config,
            resolver,
            notifier,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn HostNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn context(&self, key: InstanceKey) -> LaunchContext<'_> {
        LaunchContext {
            key,
            config: &self.config,
            resolver: self.resolver.as_ref(),
            notifier: self.notifier.as_ref(),
        }
    }

    fn entry(&self, key: InstanceKey) -> Option<Arc<Supervisor>> {
        self.entries.lock().get(&key).cloned()
    }

    /// Returns the entry for `key`, recreating it when the plugin identity changed.
    pub fn ensure_entry(&self, key: InstanceKey, plugin: &Path) -> Arc<Supervisor> {
        let (entry, replaced) = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry) if entry.plugin() == plugin => (Arc::clone(entry), None),
                _ => {
                    let entry = Arc::new(Supervisor::new(plugin.to_path_buf(), &self.config));
                    let replaced = entries.insert(key, Arc::clone(&entry));
                    (entry, replaced)
                }
            }
        };

        if let Some(old) = replaced {
            tracing::info!(instance = %key, plugin = %plugin.display(), "plugin changed, recreating entry");
            drop(old.retire());
        }
        entry
    }

    /// Host audio callback. `output` always receives a full block, processed or passed through.
    pub fn process(
        &self,
        key: InstanceKey,
        instance: &InstanceConfig,
        input: &[i16],
        output: &mut [i16],
        channels: usize,
        sample_rate: f64,
    ) -> ProcessOutcome {
        if !instance.is_configured() || input.is_empty() || channels == 0 {
            self.remove_instance(key);
            bypass(input, output);
            return ProcessOutcome::Bypassed(BypassReason::NotConfigured);
        }

        let entry = self.ensure_entry(key, &instance.plugin_path);
        entry.process(
            &self.context(key),
            &instance.state,
            input,
            output,
            channels,
            sample_rate,
        )
    }

    /// Live session for `key`, with a fresh liveness check.
    fn live_session(&self, key: InstanceKey) -> Option<(Arc<Supervisor>, Arc<HelperSession>)> {
        let entry = self.entry(key)?;
        let session = entry.session()?;
        if !session.is_alive() {
            return None;
        }
        Some((entry, session))
    }

    /// Captures the helper's current state token. `EMPTY` becomes an empty string.
    pub fn capture_state(&self, key: InstanceKey) -> Option<String> {
        let (entry, session) = self.live_session(key)?;
        match session.fetch_state() {
            Ok(token) if token == "EMPTY" => Some(String::new()),
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(instance = %key, error = %e, "state capture failed");
                if let Some(notice) = unresponsive_notice(entry.plugin(), &e) {
                    self.notifier.notify(key, &notice);
                }
                None
            }
        }
    }

    /// Captures state only while the editor is open, e.g. right before the host saves.
    pub fn save_state_if_editor_visible(&self, key: InstanceKey) -> Option<String> {
        let entry = self.entry(key)?;
        if !entry.editor_visible() {
            return None;
        }
        self.capture_state(key)
    }

    /// Shows or hides the plugin editor. Hiding captures the state for persistence.
    pub fn toggle_editor(&self, key: InstanceKey) -> EditorToggle {
        let Some((entry, session)) = self.live_session(key) else {
            self.notifier.notify(key, &Notice::NotRunning);
            return EditorToggle::Refused;
        };

        let visible = entry.editor_visible();
        let command = if visible {
            Command::HideGui
        } else {
            Command::ShowGui
        };

        match session.request(&command) {
            Ok(Response::Ok(_)) => {}
            Ok(Response::Fail(reason)) => {
                tracing::warn!(instance = %key, %reason, "editor toggle rejected");
                return EditorToggle::Refused;
            }
            Err(e) => {
                if let Some(notice) = unresponsive_notice(entry.plugin(), &e) {
                    self.notifier.notify(key, &notice);
                }
                return EditorToggle::Refused;
            }
        }

        entry.set_editor_visible(!visible);
        if visible {
            EditorToggle::Hidden {
                state: self.capture_state(key),
            }
        } else {
            EditorToggle::Shown
        }
    }

    /// Switches the instance to another plugin: drops the entry and the persisted state.
    pub fn select_plugin(&self, key: InstanceKey, instance: &mut InstanceConfig, plugin: PathBuf) {
        self.remove_instance(key);
        instance.plugin_path = plugin;
        instance.state.clear();
    }

    pub fn remove_instance(&self, key: InstanceKey) {
        let removed = self.entries.lock().remove(&key);
        if let Some(entry) = removed {
            tracing::debug!(instance = %key, "removing instance");
            drop(entry.retire());
        }
    }

    /// Tears down every instance, asking each helper to exit.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "shutting down plugin bridges");
        }
        for (_, entry) in drained {
            drop(entry.retire());
        }
    }

    pub fn status(&self, key: InstanceKey) -> Option<InstanceStatus> {
        self.entry(key).map(|entry| entry.status())
    }

    pub fn instance_count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// A helper that answered `FAIL` is alive and listening; only transport failures count
/// as unresponsive.
fn unresponsive_notice(plugin: &Path, error: &BridgeError) -> Option<Notice> {
    match error {
        BridgeError::Refused(_) => None,
        e => Some(Notice::HelperUnresponsive {
            plugin: plugin.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

impl Drop for BridgeRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchStage;
    use crate::resolver::HelperLaunch;
    use crate::supervisor::EntryState;

    struct NoHelpers;

    impl HelperResolver for NoHelpers {
        fn resolve(&self, plugin_path: &Path) -> Result<HelperLaunch> {
            Err(BridgeError::launch(plugin_path, LaunchStage::Resolving, "no helpers in tests"))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<(InstanceKey, Notice)>>,
    }

    impl HostNotifier for RecordingNotifier {
        fn notify(&self, instance: InstanceKey, notice: &Notice) {
            self.notices.lock().push((instance, notice.clone()));
        }
    }

    fn registry() -> (BridgeRegistry, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = BridgeRegistry::with_parts(
            BridgeConfig::default(),
            Box::new(NoHelpers),
            notifier.clone(),
        );
        (registry, notifier)
    }

    #[test]
    fn test_instance_key_display() {
        assert_eq!(InstanceKey(12).to_string(), "#12");
    }

    #[test]
    fn test_refused_request_is_not_unresponsive() {
        let plugin = Path::new("/plugins/gain.vst3");
        let refused = BridgeError::Refused("get_state: NoPlugin".to_string());
        assert_eq!(unresponsive_notice(plugin, &refused), None);

        let timeout = BridgeError::Timeout {
            operation: "response to 'get_state'".to_string(),
            duration_ms: 100,
        };
        assert!(matches!(
            unresponsive_notice(plugin, &timeout),
            Some(Notice::HelperUnresponsive { .. })
        ));
    }

    #[test]
    fn test_unconfigured_instance_passes_through() {
        let (registry, _) = registry();
        let input = [5i16, 6, 7, 8];
        let mut output = [0i16; 4];

        let outcome = registry.process(
            InstanceKey(1),
            &InstanceConfig::default(),
            &input,
            &mut output,
            2,
            44100.0,
        );
        assert_eq!(outcome, ProcessOutcome::Bypassed(BypassReason::NotConfigured));
        assert_eq!(output, input);
        assert_eq!(registry.instance_count(), 0);
    }

    #[test]
    fn test_launch_failure_reported_once() {
        let (registry, notifier) = registry();
        let config = InstanceConfig::new("/plugins/missing.vst3");
        let input = [100i16; 64];

        for _ in 0..3 {
            let mut output = [0i16; 64];
            let outcome = registry.process(InstanceKey(1), &config, &input, &mut output, 1, 48000.0);
            assert_eq!(outcome, ProcessOutcome::Bypassed(BypassReason::LaunchFailed));
            assert_eq!(output, input);
        }

        let notices = notifier.notices.lock();
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0].1, Notice::LaunchFailed { .. }));
        assert_eq!(
            registry.status(InstanceKey(1)).map(|s| s.state),
            Some(EntryState::LaunchFailed)
        );
    }

    #[test]
    fn test_plugin_change_recreates_entry() {
        let (registry, _) = registry();
        let first = registry.ensure_entry(InstanceKey(7), Path::new("/p/a.vst3"));
        let same = registry.ensure_entry(InstanceKey(7), Path::new("/p/a.vst3"));
        assert!(Arc::ptr_eq(&first, &same));

        let other = registry.ensure_entry(InstanceKey(7), Path::new("/p/b.vst3"));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.instance_count(), 1);
        assert_eq!(other.plugin(), Path::new("/p/b.vst3"));
    }

    #[test]
    fn test_select_plugin_clears_state_and_entry() {
        let (registry, _) = registry();
        registry.ensure_entry(InstanceKey(3), Path::new("/p/a.vst3"));

        let mut config = InstanceConfig {
            plugin_path: PathBuf::from("/p/a.vst3"),
            state: "DUAL:AAAA".to_string(),
        };
        registry.select_plugin(InstanceKey(3), &mut config, PathBuf::from("/p/c.vst3"));

        assert_eq!(config.plugin_path, PathBuf::from("/p/c.vst3"));
        assert!(config.state.is_empty());
        assert!(registry.status(InstanceKey(3)).is_none());
    }

    #[test]
    fn test_editor_toggle_refused_without_helper() {
        let (registry, notifier) = registry();
        assert_eq!(registry.toggle_editor(InstanceKey(9)), EditorToggle::Refused);
        assert_eq!(notifier.notices.lock()[0].1, Notice::NotRunning);
        assert!(registry.save_state_if_editor_visible(InstanceKey(9)).is_none());
    }

    #[test]
    fn test_shutdown_clears_entries() {
        let (registry, _) = registry();
        registry.ensure_entry(InstanceKey(1), Path::new("/p/a.vst3"));
        registry.ensure_entry(InstanceKey(2), Path::new("/p/b.vst3"));
        assert_eq!(registry.instance_count(), 2);

        registry.shutdown();
        assert_eq!(registry.instance_count(), 0);
    }
}
