//! Configuration for softpty
//!
//! Mode flags and channel settings are fixed for the lifetime of an
//! allocation, so configuration is read once at startup:
//! - TOML config file (`$XDG_CONFIG_HOME/softpty/config.toml` or explicit path)
//! - Environment variable overrides (`SOFTPTY_*`)
//! - Config precedence: CLI > env > file > defaults (the CLI layer lives in
//!   the relay binary)

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::discipline::line::DEFAULT_LINE_CAPACITY;
use crate::discipline::TtyModes;
use crate::pty::ChannelKind;

/// Allocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket type of both channel pairs
    pub channel: ChannelKind,
    /// Bound of the line-edit buffer in bytes
    pub line_capacity: usize,
    /// Prefix of allocation names
    pub name_prefix: String,
    /// Echo and raw flags handed to both workers
    pub modes: TtyModes,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: ChannelKind::default(),
            line_capacity: DEFAULT_LINE_CAPACITY,
            name_prefix: "softpty".to_string(),
            modes: TtyModes::default(),
        }
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Config error in '{}': {}", field, self.message)
        } else {
            write!(f, "Config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration: environment variables > config file > defaults.
    ///
    /// A missing file is not an error; an unreadable or invalid one is logged
    /// and replaced by defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let config_path = path.map(Path::to_path_buf).or_else(Self::default_config_path);
        if let Some(path) = &config_path {
            if path.exists() {
                match Self::load_from_file(path) {
                    Ok(file_config) => config = file_config,
                    Err(e) => warn!("Failed to load config from {:?}: {}", path, e),
                }
            }
        }

        config.apply_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("Failed to read config file: {}", e),
            field: None,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError {
            message: format!("Failed to parse config file: {}", e),
            field: None,
        })
    }

    /// Apply environment variables to config
    pub fn apply_env_vars(&mut self) {
        if let Some(echo) = env::var("SOFTPTY_ECHO").ok().as_deref().and_then(parse_bool) {
            self.modes.echo = echo;
        }
        if let Some(raw) = env::var("SOFTPTY_RAW").ok().as_deref().and_then(parse_bool) {
            self.modes.raw = raw;
        }
        if let Ok(val) = env::var("SOFTPTY_CHANNEL") {
            match val.parse::<ChannelKind>() {
                Ok(kind) => self.channel = kind,
                Err(e) => warn!("Ignoring SOFTPTY_CHANNEL: {}", e),
            }
        }
        if let Ok(val) = env::var("SOFTPTY_LINE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                self.line_capacity = capacity;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line_capacity < 16 {
            return Err(ConfigError {
                message: "Line capacity must be at least 16".to_string(),
                field: Some("line_capacity".to_string()),
            });
        }
        if self.line_capacity > 65536 {
            return Err(ConfigError {
                message: "Line capacity must be at most 65536".to_string(),
                field: Some("line_capacity".to_string()),
            });
        }
        if self.name_prefix.is_empty() {
            return Err(ConfigError {
                message: "Name prefix must not be empty".to_string(),
                field: Some("name_prefix".to_string()),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("softpty").join("config.toml"))
    }
}
