//! Configuration loading from `~/.config/bugpack/config.toml`.
//!
//! A missing or malformed file falls back to defaults; configuration can
//! never make the tool fail to start.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_OUTPUT_FORMAT: &str = "md";
pub const DEFAULT_MAX_OUTPUT_SIZE: u64 = 1024 * 1024;

/// Configuration directory, honoring `XDG_CONFIG_HOME`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("bugpack");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("bugpack")
}

/// Default configuration file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn default_env_allowlist() -> HashSet<String> {
    crate::capture::DEFAULT_ENV_ALLOWLIST
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_output_size() -> u64 {
    DEFAULT_MAX_OUTPUT_SIZE
}

fn default_format() -> String {
    DEFAULT_OUTPUT_FORMAT.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Environment variables to include in snapshots.
    #[serde(default = "default_env_allowlist")]
    pub env_allowlist: HashSet<String>,
    /// Default command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Maximum output size in bytes.
    #[serde(default = "default_max_output_size")]
    pub max_output_size: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            env_allowlist: default_env_allowlist(),
            timeout: DEFAULT_TIMEOUT_SECS,
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Path to a custom patterns file.
    #[serde(default)]
    pub custom_patterns: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub redact_emails: bool,
    #[serde(default = "default_true")]
    pub redact_ips: bool,
    #[serde(default)]
    pub redact_uuids: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            custom_patterns: None,
            redact_emails: true,
            redact_ips: true,
            redact_uuids: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default render format (`md` or `json`).
    #[serde(default = "default_format")]
    pub default_format: String,
    #[serde(default)]
    pub default_output_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            default_output_dir: None,
        }
    }
}

/// Main configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BugpackConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl BugpackConfig {
    /// Load configuration from `path`, or the default location when `None`.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_file);

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable config, using defaults");
                Self::default()
            }
        }
    }

    /// Build a [`PatternConfig`](crate::redact::PatternConfig) from the
    /// redaction section.
    pub fn pattern_config(&self) -> crate::redact::PatternConfig {
        crate::redact::PatternConfig {
            redact_emails: self.redaction.redact_emails,
            redact_ips: self.redaction.redact_ips,
            redact_uuids: self.redaction.redact_uuids,
            ..crate::redact::PatternConfig::default()
        }
    }
}

/// Load configuration from file.
pub fn load_config(path: Option<&Path>) -> BugpackConfig {
    BugpackConfig::load(path)
}
