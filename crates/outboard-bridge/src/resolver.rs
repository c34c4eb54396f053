//! Plugin path to helper executable resolution.

use crate::config::{normalize_extension, BridgeConfig};
use crate::error::{BridgeError, LaunchStage, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// The plugin file is itself a helper executable; initialised with `init`.
    Standalone,
    /// A format helper loads the plugin; initialised with `load_plugin`.
    Mapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperLaunch {
    pub executable: PathBuf,
    pub mode: LaunchMode,
}

pub trait HelperResolver: Send + Sync {
    fn resolve(&self, plugin_path: &Path) -> Result<HelperLaunch>;
}

/// Resolves by file extension through the configured mapping table.
#[derive(Debug, Clone)]
pub struct MappingResolver {
    helper_dir: PathBuf,
    standalone_extensions: Vec<String>,
    mappings: BTreeMap<String, String>,
}

impl MappingResolver {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            helper_dir: config.helper_dir.clone(),
            standalone_extensions: config
                .standalone_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            mappings: config
                .mappings
                .iter()
                .map(|(ext, helper)| (normalize_extension(ext), helper.clone()))
                .collect(),
        }
    }

    fn helper_path(&self, helper: &str) -> PathBuf {
        let path = self.helper_dir.join(helper);
        if path.extension().is_none() && !std::env::consts::EXE_SUFFIX.is_empty() {
            let mut with_suffix = path.clone().into_os_string();
            with_suffix.push(std::env::consts::EXE_SUFFIX);
            let with_suffix = PathBuf::from(with_suffix);
            if with_suffix.exists() {
                return with_suffix;
            }
        }
        path
    }
}

impl HelperResolver for MappingResolver {
    fn resolve(&self, plugin_path: &Path) -> Result<HelperLaunch> {
        let extension = plugin_path
            .extension()
            .map(|e| normalize_extension(&e.to_string_lossy()))
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                BridgeError::launch(plugin_path, LaunchStage::Resolving, "plugin path has no extension")
            })?;

        if self.standalone_extensions.contains(&extension) {
            return Ok(HelperLaunch {
                executable: plugin_path.to_path_buf(),
                mode: LaunchMode::Standalone,
            });
        }

        let helper = self.mappings.get(&extension).ok_or_else(|| {
            BridgeError::launch(
                plugin_path,
                LaunchStage::Resolving,
                format!("no helper mapped for .{} plugins", extension),
            )
        })?;

        let executable = self.helper_path(helper);
        if !executable.is_file() {
            return Err(BridgeError::launch(
                plugin_path,
                LaunchStage::Resolving,
                format!("helper executable not found: {}", executable.display()),
            ));
        }

        Ok(HelperLaunch {
            executable,
            mode: LaunchMode::Mapped,
        })
    }
}
