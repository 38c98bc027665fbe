//! Bootstrap configuration loading and config file resolution
//!
//! Resolution priority for the config file path:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`~/.config/jimdex/<module>.toml`)
//! 4. Built-in defaults (no file)
//!
//! A missing config file is never fatal: the service logs a warning and starts
//! with defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "JIMDEX_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Every field has a default so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Broadcast capacity of the event bus
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Capacity of the raw record ingest queue
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    /// Enrichment fetcher settings
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Recommender profile lookups
    #[serde(default)]
    pub profiles: ProfilesConfig,

    /// Record kinds used to classify raw feed records
    #[serde(default)]
    pub records: RecordsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            event_bus_capacity: default_event_bus_capacity(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            fetcher: FetcherConfig::default(),
            profiles: ProfilesConfig::default(),
            records: RecordsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Enrichment fetcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Upper bound for one enrichment fetch (both lookups), in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Sub-path of the info resource, relative to the entry address
    #[serde(default = "default_info_path")]
    pub info_path: String,

    /// Sub-path of the reserves resource, relative to the entry address
    #[serde(default = "default_reserves_path")]
    pub reserves_path: String,

    /// User-Agent header sent with lookups
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            info_path: default_info_path(),
            reserves_path: default_reserves_path(),
            user_agent: default_user_agent(),
        }
    }
}

/// Recommender profile lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Base URL of a profile lookup service (`{endpoint}/{recommender_id}`)
    ///
    /// Profile lookups are disabled when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Maximum number of queued profile lookups
    #[serde(default = "default_profile_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum number of concurrent profile lookups
    #[serde(default = "default_profile_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            queue_capacity: default_profile_queue_capacity(),
            max_concurrent: default_profile_max_concurrent(),
        }
    }
}

/// Record kinds for feed classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsConfig {
    /// Kind of announcement records
    #[serde(default = "default_announcement_kind")]
    pub announcement_kind: u32,

    /// Kind of recommendation records
    #[serde(default = "default_recommendation_kind")]
    pub recommendation_kind: u32,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            announcement_kind: default_announcement_kind(),
            recommendation_kind: default_recommendation_kind(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

fn default_port() -> u16 {
    5780
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_event_bus_capacity() -> usize {
    1000
}

fn default_ingest_queue_capacity() -> usize {
    1024
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_info_path() -> String {
    "info".to_string()
}

fn default_reserves_path() -> String {
    "reserves".to_string()
}

fn default_user_agent() -> String {
    concat!("jimdex/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_profile_queue_capacity() -> usize {
    256
}

fn default_profile_max_concurrent() -> usize {
    4
}

fn default_announcement_kind() -> u32 {
    31678
}

fn default_recommendation_kind() -> u32 {
    38000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve which config file to read, if any
///
/// Returns `None` when no candidate exists; callers then use defaults.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    module_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory
    let user_config = dirs::config_dir()
        .map(|d| d.join("jimdex").join(format!("{}.toml", module_name)));
    match user_config {
        Some(path) if path.exists() => Some(path),
        _ => None,
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Load the config file at `path`, falling back to defaults when absent
///
/// A missing file logs a warning and yields defaults. A file that exists but
/// does not parse is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file not found: {}, using built-in defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let config = load_toml_config(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write a config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
