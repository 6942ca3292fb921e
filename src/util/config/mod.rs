//! delaytask configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments (--config PATH)
//! 2. Environment variable (DELAYTASK_CONFIG)
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use delaytask::util::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_toml_str("[task]\nfailure_exit_code = 3\n").unwrap();
//! assert_eq!(config.task.failure_exit_code, 3);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::runtime::scheduler::{TaskConfig, TimerConfig};
use crate::util::logger::LogLevel;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "DELAYTASK_CONFIG";

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// Timer settings
    #[serde(default)]
    pub timer: TimerConfig,
    /// Task settings
    #[serde(default)]
    pub task: TaskConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogConfig {
    /// Minimum level emitted
    #[serde(default)]
    pub level: LogLevel,
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task.failure_exit_code == 0 {
            return Err(ConfigError::Invalid(
                "task.failure_exit_code must be non-zero".to_string(),
            ));
        }
        if self.timer.thread_name.is_empty() {
            return Err(ConfigError::Invalid(
                "timer.thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Config file path from the environment, if set.
pub fn env_config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Load configuration from `path`, else from `DELAYTASK_CONFIG`, else defaults.
pub fn load_runtime_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    match path.map(Path::to_path_buf).or_else(env_config_path) {
        Some(path) => RuntimeConfig::load(&path),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}
