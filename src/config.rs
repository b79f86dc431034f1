use crate::host::SearchScope;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading configuration from the environment
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

const RESPONSE_TIMEOUT_VAR: &str = "DOWNLOAD_LIST_RESPONSE_TIMEOUT_SECS";
const DOWNLOAD_DELAY_VAR: &str = "DOWNLOAD_LIST_DOWNLOAD_DELAY_SECS";
const SEARCH_SCOPE_VAR: &str = "DOWNLOAD_LIST_SEARCH_SCOPE";
const PRIVATE_MARKER_VAR: &str = "DOWNLOAD_LIST_PRIVATE_MARKER";

/// Runtime configuration for a sequencer run
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// How long to wait for a qualifying result before giving up on a term
    pub response_timeout: Duration,
    /// Delay between detecting a match and enqueueing the download
    pub download_delay: Duration,
    /// Where searches are sent
    pub search_scope: SearchScope,
    /// Filenames containing this token (case-insensitive) are never downloaded
    pub private_marker: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            response_timeout: Duration::from_secs(5),
            download_delay: Duration::from_secs(3),
            search_scope: SearchScope::Global,
            private_marker: "[prive]".to_string(),
        }
    }
}

impl Config {
    /// Load configuration based on build mode
    ///
    /// Debug builds pick up a `.env` file first. Unset variables keep their defaults.
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("Config: Dev mode activated - loaded .env file");
            }
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup (environment, tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup(RESPONSE_TIMEOUT_VAR) {
            config.response_timeout = parse_seconds(RESPONSE_TIMEOUT_VAR, &value)?;
        }
        if let Some(value) = lookup(DOWNLOAD_DELAY_VAR) {
            config.download_delay = parse_seconds(DOWNLOAD_DELAY_VAR, &value)?;
        }
        if let Some(value) = lookup(SEARCH_SCOPE_VAR) {
            config.search_scope = value.parse().map_err(|_| ConfigError::InvalidValue {
                name: SEARCH_SCOPE_VAR,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(PRIVATE_MARKER_VAR) {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: PRIVATE_MARKER_VAR,
                    value,
                });
            }
            config.private_marker = value.trim().to_string();
        }

        tracing::debug!(
            "Config: response timeout {:?}, download delay {:?}, scope {:?}",
            config.response_timeout,
            config.download_delay,
            config.search_scope
        );

        Ok(config)
    }
}

fn parse_seconds(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        })
}
