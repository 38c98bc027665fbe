//! Runtime settings for jimdex-engine
//!
//! Derived from the bootstrap [`TomlConfig`] after validation. Command-line
//! overrides are applied by the binary before conversion.

use jimdex_common::config::{RecordsConfig, TomlConfig};
use jimdex_common::{Error, Result};
use reqwest::Url;
use std::net::SocketAddr;
use std::time::Duration;

use crate::services::ProfileQueueSettings;

/// Enrichment fetcher settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherSettings {
    pub timeout: Duration,
    pub info_path: String,
    pub reserves_path: String,
    pub user_agent: String,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self::from(&TomlConfig::default())
    }
}

impl From<&TomlConfig> for FetcherSettings {
    fn from(config: &TomlConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.fetcher.timeout_secs),
            info_path: config.fetcher.info_path.clone(),
            reserves_path: config.fetcher.reserves_path.clone(),
            user_agent: config.fetcher.user_agent.clone(),
        }
    }
}

/// Validated engine settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub listen_addr: SocketAddr,
    pub event_bus_capacity: usize,
    pub ingest_queue_capacity: usize,
    pub fetcher: FetcherSettings,
    /// `None` disables profile lookups
    pub profile_endpoint: Option<String>,
    pub profile_queue: ProfileQueueSettings,
    pub records: RecordsConfig,
}

impl EngineSettings {
    /// Validate a bootstrap config and convert it to runtime settings
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let listen_addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
            .parse()
            .map_err(|e| {
                Error::Config(format!(
                    "invalid bind address {}:{}: {}",
                    config.bind_address, config.port, e
                ))
            })?;

        require_positive("event_bus_capacity", config.event_bus_capacity as u64)?;
        require_positive("ingest_queue_capacity", config.ingest_queue_capacity as u64)?;
        require_positive("fetcher.timeout_secs", config.fetcher.timeout_secs)?;
        require_positive("profiles.queue_capacity", config.profiles.queue_capacity as u64)?;
        require_positive("profiles.max_concurrent", config.profiles.max_concurrent as u64)?;

        if config.fetcher.info_path.trim_matches('/').is_empty()
            || config.fetcher.reserves_path.trim_matches('/').is_empty()
        {
            return Err(Error::Config(
                "fetcher.info_path and fetcher.reserves_path must not be empty".to_string(),
            ));
        }

        if config.records.announcement_kind == config.records.recommendation_kind {
            return Err(Error::Config(format!(
                "records.announcement_kind and records.recommendation_kind must differ (both {})",
                config.records.announcement_kind
            )));
        }

        let profile_endpoint = match config.profiles.endpoint.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(endpoint) => {
                Url::parse(endpoint).map_err(|e| {
                    Error::Config(format!("invalid profiles.endpoint '{}': {}", endpoint, e))
                })?;
                Some(endpoint.to_string())
            }
        };

        Ok(Self {
            listen_addr,
            event_bus_capacity: config.event_bus_capacity,
            ingest_queue_capacity: config.ingest_queue_capacity,
            fetcher: FetcherSettings::from(config),
            profile_endpoint,
            profile_queue: ProfileQueueSettings {
                capacity: config.profiles.queue_capacity,
                max_concurrent: config.profiles.max_concurrent,
            },
            records: config.records,
        })
    }
}

fn require_positive(key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{} must be greater than 0", key)));
    }
    Ok(())
}
