//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base endpoint every path is resolved against.
    pub base_url: Url,
    /// Per-call timeout. Calls are never retried by the core.
    pub request_timeout: Duration,
    /// Maximum age of the cached orders list before a read re-fetches.
    pub orders_stale_after: Duration,
    /// Maximum age of the cached earnings aggregate before a read re-fetches.
    pub earnings_stale_after: Duration,
    /// Background refresh period for orders.
    pub orders_poll_interval: Duration,
    /// Location of the durable credential store.
    pub credential_db_path: PathBuf,
    /// Serve the fixed offline dataset when a read fails on the wire.
    pub offline_fallback: bool,
}

/// Default API endpoint for local development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            request_timeout: Duration::from_secs(10),
            orders_stale_after: Duration::from_secs(30),
            earnings_stale_after: Duration::from_secs(30),
            orders_poll_interval: Duration::from_secs(30),
            credential_db_path: PathBuf::from("./data/worker-client.db"),
            offline_fallback: true,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `WORKER_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("WORKER_API_BASE_URL") {
            config.base_url = parse_base_url(&raw)?;
        }
        if let Some(raw) = lookup("WORKER_API_TIMEOUT_SECS") {
            config.request_timeout = parse_secs("WORKER_API_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("WORKER_ORDERS_POLL_SECS") {
            config.orders_poll_interval = parse_secs("WORKER_ORDERS_POLL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("WORKER_STALE_SECS") {
            let stale = parse_secs("WORKER_STALE_SECS", &raw)?;
            config.orders_stale_after = stale;
            config.earnings_stale_after = stale;
        }
        if let Some(raw) = lookup("WORKER_DATA_PATH") {
            config.credential_db_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WORKER_OFFLINE_FALLBACK") {
            config.offline_fallback = parse_bool("WORKER_OFFLINE_FALLBACK", &raw)?;
        }

        Ok(config)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: "WORKER_API_BASE_URL".to_string(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: "WORKER_API_BASE_URL".to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    // Endpoint paths are joined relative to the base, which needs a trailing slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a whole number of seconds, got '{raw}'"),
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
