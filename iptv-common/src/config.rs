//! Configuration loading and config file resolution
//!
//! All settings carry built-in defaults, so a missing file or a file that
//! only sets a few keys still yields a complete [`CoreConfig`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable consulted for the config file path
pub const CONFIG_ENV_VAR: &str = "IPTV_CONFIG";

/// Complete configuration for the playback core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub schedule_cache: CacheSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retry and lease release settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Retry ceiling for a failed open (default: 5)
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Wait before the second attempt; doubles after each failure (default: 1000ms)
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Cooldown installed when a playback surface stops (default: 2000ms)
    #[serde(default = "default_release_cooldown_ms")]
    pub release_cooldown_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            release_cooldown_ms: default_release_cooldown_ms(),
        }
    }
}

impl PlaybackSettings {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn release_cooldown(&self) -> Duration {
        Duration::from_millis(self.release_cooldown_ms)
    }
}

/// Schedule cache sizing and freshness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum entry age before a read re-queries (default: 5 minutes)
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,

    /// Entry count above which an expiry sweep runs (default: 1000)
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_release_cooldown_ms() -> u64 {
    2000
}

fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CoreConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the resolved config path, falling back to built-in defaults
    ///
    /// A missing file is not an error; an unreadable or invalid one is.
    pub fn load_or_default(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg, CONFIG_ENV_VAR) {
            Some(path) => Self::load(&path),
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the playback core cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.playback.max_retry_attempts == 0 {
            return Err(Error::Config(
                "playback.max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.schedule_cache.ttl_ms == 0 {
            return Err(Error::Config(
                "schedule_cache.ttl_ms must be greater than 0".to_string(),
            ));
        }
        if self.schedule_cache.max_entries == 0 {
            return Err(Error::Config(
                "schedule_cache.max_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Config file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Platform config directory, if the file exists
///
/// An explicit path (CLI or env) is returned even when it does not exist so
/// the caller reports the typo instead of silently using defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let default_path = default_config_path()?;
    if default_path.exists() {
        Some(default_path)
    } else {
        debug!("No config file at {}", default_path.display());
        None
    }
}

/// Platform config file location (`<config_dir>/iptv/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("iptv").join("config.toml"))
}
