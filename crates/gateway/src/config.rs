//! Configuration management for the rootgate gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/rootgate/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::messages::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_READ_LENGTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::default_shell;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("default_read_length must be greater than 0")]
    InvalidReadLength,

    #[error("default_timeout must be between 1 and {max} seconds, got {0}", max = MAX_TIMEOUT_SECS)]
    InvalidTimeout(u64),

    #[error("shell not found: {0}")]
    InvalidShellPath(String),

    #[error("root is not an existing directory: {0}")]
    InvalidRoot(PathBuf),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for the default command timeout (one day).
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Environment variable overriding the session root.
pub const ENV_ROOT: &str = "ROOTGATE_ROOT";

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "ROOTGATE_LOG_LEVEL";

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Root and logging settings.
    pub gateway: GatewayConfig,

    /// File operation settings.
    pub file: FileConfig,

    /// Shell command settings.
    pub command: CommandConfig,
}

/// Root and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory the gateway is confined to. Prompted for when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Also write logs to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// File operation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Bytes returned by `read_file` when the request gives no length.
    pub default_read_length: u64,
}

/// Shell command settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// Shell used to interpret commands.
    pub shell: String,

    /// Timeout in seconds when a request passes 0.
    pub default_timeout: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            root: None,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            default_read_length: DEFAULT_READ_LENGTH,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            default_timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rootgate")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values; empty
    /// values are ignored. Supported variables:
    /// - ROOTGATE_ROOT: Override the session root
    /// - ROOTGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ENV_ROOT) {
            if !root.is_empty() {
                tracing::info!("Overriding root from environment: {}", root);
                self.gateway.root = Some(PathBuf::from(root));
            }
        }

        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.gateway.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.gateway.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.gateway.log_level.clone()));
        }

        if self.file.default_read_length == 0 {
            return Err(ConfigError::InvalidReadLength);
        }

        let timeout = self.command.default_timeout;
        if !(1..=MAX_TIMEOUT_SECS).contains(&timeout) {
            return Err(ConfigError::InvalidTimeout(timeout));
        }

        let shell_path = Path::new(&self.command.shell);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&self.command.shell).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShellPath(self.command.shell.clone()));
        }

        if let Some(root) = &self.gateway.root {
            if !root.is_dir() {
                return Err(ConfigError::InvalidRoot(root.clone()));
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
