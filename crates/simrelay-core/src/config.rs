//! Configuration file support for simrelay
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/simrelay/config.toml`
//! - macOS: `~/Library/Application Support/simrelay/config.toml`
//! - Windows: `%APPDATA%\simrelay\config.toml`
//!
//! Every section is optional; missing keys fall back to the defaults below.

use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default interpreter thread stack: 2^22 bytes.
pub const DEFAULT_STACK_SIZE: usize = 1 << 22;

/// How the interpreter is hosted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Run the interpreter synchronously on the host thread.
    Direct,
    /// Run the interpreter on its own thread behind a rendezvous.
    #[default]
    Threaded,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Hosting variant
    pub variant: Variant,
    /// Interpreter thread settings
    pub runner: RunnerSettings,
    /// Script binding settings
    pub script: ScriptSettings,
}

/// Interpreter thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Name given to the interpreter thread
    pub thread_name: String,
    /// Stack size of the interpreter thread in bytes
    pub stack_size: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            thread_name: "relay-interpreter".to_string(),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Script binding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Module under which the relay functions are registered
    pub module: String,
    /// Script function called for every event
    pub resume_fn: String,
    /// Script function called once at shutdown
    pub finish_fn: String,
    /// Maximum script call depth
    pub max_call_levels: usize,
    /// Maximum expression nesting depth
    pub max_expr_depth: usize,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            module: "relay".to_string(),
            resume_fn: "resume".to_string(),
            finish_fn: "finish".to_string(),
            max_call_levels: 4096,
            max_expr_depth: 4096,
        }
    }
}

impl RelayConfig {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("using default configuration ({})", e);
                Self::default()
            }
        }
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "simrelay") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    fn validate(&self) -> Result<()> {
        if self.runner.stack_size == 0 {
            return Err(Error::Config("runner.stack_size must be non-zero".to_string()));
        }
        if self.script.module.is_empty() || self.script.resume_fn.is_empty() {
            return Err(Error::Config(
                "script.module and script.resume_fn must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
