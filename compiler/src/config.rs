//! Driver configuration file
//!
//! ```toml
//! disable_passes = "BBCombine,CodeLayout"
//! print_all_passes = false
//! print_passes = "SpecialMethodInliner"
//! dump_cfg_passes = "BBOptimizations"
//! dump_cfg_folder = "/tmp/cfg"
//! load_plugins = true
//! plugin_dir = "/system/lib/aotpipe-plugins"
//! optimization_level = "O2"
//! ```
//!
//! Every key is optional.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::selectivity::OptimizationLevel;
use crate::setup::CompilerSetup;

/// Default location searched for plugins.
pub const DEFAULT_PLUGIN_DIR: &str = "/system/lib/aotpipe-plugins";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    pub disable_passes: String,
    pub print_all_passes: bool,
    pub print_passes: String,
    pub dump_cfg_passes: String,
    pub dump_cfg_folder: Option<PathBuf>,
    pub load_plugins: bool,
    pub plugin_dir: PathBuf,
    pub optimization_level: OptimizationLevel,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            disable_passes: String::new(),
            print_all_passes: false,
            print_passes: String::new(),
            dump_cfg_passes: String::new(),
            dump_cfg_folder: None,
            load_plugins: true,
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            optimization_level: OptimizationLevel::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "config parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl DriverConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Push the configuration into `setup`.
    ///
    /// Filters the default pipeline with `disable_passes`, so call it after
    /// plugins had their chance to edit the pipeline.
    pub fn apply(&self, setup: &mut CompilerSetup) {
        setup.build_default_list(&self.disable_passes);
        if self.print_all_passes {
            setup.set_print_all_passes();
        }
        setup.set_print_pass_list(self.print_passes.as_str());
        setup.set_dump_pass_list(self.dump_cfg_passes.as_str());
        if let Some(folder) = &self.dump_cfg_folder {
            setup.set_dump_cfg_folder(folder.clone());
        }

        let hooks = setup.hooks_mut();
        hooks.set_original_optimization_level(self.optimization_level);
        hooks.set_used_optimization_level(self.optimization_level);
    }
}
