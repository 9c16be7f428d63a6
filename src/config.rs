//! Engine Configuration
//!
//! Config is stored in `~/.config/livebind/config.toml`:
//!
//! ```toml
//! max_hops = 16
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 100
//! max_delay_ms = 10000
//! backoff_multiplier = 2.0
//! jitter = 0.1
//! ```
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`LIVEBIND_MAX_HOPS`, `LIVEBIND_MAX_RETRIES`)
//! 2. Config file
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BindError, Result};

pub const DEFAULT_MAX_HOPS: usize = 16;

pub const ENV_MAX_HOPS: &str = "LIVEBIND_MAX_HOPS";
pub const ENV_MAX_RETRIES: &str = "LIVEBIND_MAX_RETRIES";

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Longest relation chain a path may walk
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Backoff used when the engine wraps a store in `RetryingStore`
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            retry: RetrySettings::default(),
        }
    }
}

/// `[retry]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl EngineConfig {
    /// Returns `~/.config/livebind/` on Unix, `%APPDATA%/livebind/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livebind")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`
    ///
    /// Returns default config if the file doesn't exist, an error if it
    /// exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| BindError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| BindError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save to `path`, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| BindError::ConfigError {
                reason: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| BindError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| BindError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })?;

        Ok(())
    }

    /// Merge with environment variables
    ///
    /// Unparseable values are ignored with a warning.
    pub fn with_env(mut self) -> Self {
        if let Some(hops) = env_number::<usize>(ENV_MAX_HOPS) {
            if hops > 0 {
                self.max_hops = hops;
            }
        }
        if let Some(retries) = env_number::<u32>(ENV_MAX_RETRIES) {
            self.retry.max_retries = retries;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_hops == 0 {
            return Err(BindError::ConfigError {
                reason: "max_hops must be at least 1".to_string(),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(BindError::ConfigError {
                reason: "retry.backoff_multiplier must be >= 1.0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring non-numeric environment override");
            None
        }
    }
}
