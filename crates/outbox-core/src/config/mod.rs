//! Runtime configuration for the sync engine.
//!
//! Every value has a default; `OUTBOX_*` environment variables override them.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::db::StorageConfig;
use crate::sync::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_BATCH_SIZE: usize = 25;
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Dispatcher tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Retry budget and backoff schedule
    pub retry: RetryPolicy,
    /// Maximum records sent per tick
    pub batch_size: usize,
    /// Upper bound on a single remote call
    pub send_timeout: Duration,
    /// Period of the background scheduler
    pub tick_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl SyncConfig {
    /// Set the per-tick batch size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the per-attempt send timeout
    #[must_use]
    pub const fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backoff_base = millis_or_default(
            &lookup,
            "OUTBOX_BACKOFF_BASE_MS",
            defaults.retry.backoff_base,
        )?;
        let backoff_max =
            millis_or_default(&lookup, "OUTBOX_BACKOFF_MAX_MS", defaults.retry.backoff_max)?;
        if backoff_base.is_zero() || backoff_max < backoff_base {
            return Err(ConfigError::Invalid(
                "OUTBOX_BACKOFF_BASE_MS must be > 0 and <= OUTBOX_BACKOFF_MAX_MS".to_string(),
            ));
        }

        let max_retries = parse_or_default(
            &lookup,
            "OUTBOX_MAX_RETRIES",
            defaults.retry.max_retries,
        )?;
        if max_retries == 0 {
            return Err(ConfigError::Invalid(
                "OUTBOX_MAX_RETRIES must be >= 1".to_string(),
            ));
        }

        let batch_size = parse_or_default(&lookup, "OUTBOX_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid(
                "OUTBOX_BATCH_SIZE must be >= 1".to_string(),
            ));
        }

        let send_timeout =
            millis_or_default(&lookup, "OUTBOX_SEND_TIMEOUT_MS", defaults.send_timeout)?;
        let tick_interval =
            millis_or_default(&lookup, "OUTBOX_TICK_INTERVAL_MS", defaults.tick_interval)?;
        if send_timeout.is_zero() || tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "OUTBOX_SEND_TIMEOUT_MS and OUTBOX_TICK_INTERVAL_MS must be > 0".to_string(),
            ));
        }

        Ok(Self {
            retry: RetryPolicy {
                backoff_base,
                backoff_max,
                max_retries,
            },
            batch_size,
            send_timeout,
            tick_interval,
        })
    }
}

/// Remote store endpoint and credentials
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the remote API, without trailing slash
    pub base_url: String,
    /// Bearer token, if the remote requires one
    pub auth_token: Option<String>,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, ConfigError> {
        let base_url = normalize_text_option(Some(base_url.into())).ok_or_else(|| {
            ConfigError::Invalid("remote base URL must not be empty".to_string())
        })?;
        if !is_http_url(&base_url) {
            return Err(ConfigError::Invalid(
                "remote base URL must include http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: normalize_text_option(auth_token),
        })
    }

    /// Read `OUTBOX_REMOTE_URL`/`OUTBOX_REMOTE_TOKEN`; `None` when no URL is set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(base_url) = normalize_text_option(lookup("OUTBOX_REMOTE_URL")) else {
            return Ok(None);
        };
        Self::new(base_url, lookup("OUTBOX_REMOTE_TOKEN")).map(Some)
    }
}

/// Read `OUTBOX_MAX_DB_PAGES` and `OUTBOX_BUSY_TIMEOUT_MS` into a storage
/// configuration.
pub fn storage_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<StorageConfig, ConfigError> {
    let max_pages = normalize_text_option(lookup("OUTBOX_MAX_DB_PAGES"))
        .map(|value| {
            value.parse::<u32>().map_err(|_| {
                ConfigError::Invalid("OUTBOX_MAX_DB_PAGES must be a positive integer".to_string())
            })
        })
        .transpose()?;

    let busy_timeout = normalize_text_option(lookup("OUTBOX_BUSY_TIMEOUT_MS"))
        .map(|value| {
            value.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                ConfigError::Invalid(
                    "OUTBOX_BUSY_TIMEOUT_MS must be a duration in milliseconds".to_string(),
                )
            })
        })
        .transpose()?;

    Ok(StorageConfig {
        max_pages,
        busy_timeout,
    })
}

/// Read storage configuration from the process environment.
pub fn storage_from_env() -> Result<StorageConfig, ConfigError> {
    let values: HashMap<String, String> = env::vars().collect();
    storage_from_lookup(|name| values.get(name).cloned())
}

fn parse_or_default<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match normalize_text_option(lookup(name)) {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative integer"))),
    }
}

fn millis_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match normalize_text_option(lookup(name)) {
        None => Ok(default),
        Some(value) => value.parse::<u64>().map(Duration::from_millis).map_err(|_| {
            ConfigError::Invalid(format!("{name} must be a duration in milliseconds"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup_from<'a>(map: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|value| (*value).to_string())
    }

    #[test]
    fn sync_config_defaults_match_documented_values() {
        let map = HashMap::new();
        let config = SyncConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.retry.backoff_base, Duration::from_secs(1));
        assert_eq!(config.retry.backoff_max, Duration::from_secs(300));
        assert_eq!(config.retry.max_retries, 10);
    }

    #[test]
    fn sync_config_reads_overrides() {
        let mut map = HashMap::new();
        map.insert("OUTBOX_BACKOFF_BASE_MS", "500");
        map.insert("OUTBOX_BACKOFF_MAX_MS", "60000");
        map.insert("OUTBOX_MAX_RETRIES", "4");
        map.insert("OUTBOX_BATCH_SIZE", " 7 ");

        let config = SyncConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config.retry.backoff_base, Duration::from_millis(500));
        assert_eq!(config.retry.backoff_max, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.batch_size, 7);
    }

    #[test]
    fn sync_config_rejects_inverted_backoff_bounds() {
        let mut map = HashMap::new();
        map.insert("OUTBOX_BACKOFF_BASE_MS", "10000");
        map.insert("OUTBOX_BACKOFF_MAX_MS", "1000");

        let err = SyncConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("OUTBOX_BACKOFF_BASE_MS"));
    }

    #[test]
    fn sync_config_rejects_garbage_numbers() {
        let mut map = HashMap::new();
        map.insert("OUTBOX_BATCH_SIZE", "lots");

        let err = SyncConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("OUTBOX_BATCH_SIZE"));
    }

    #[test]
    fn remote_config_is_optional() {
        let map = HashMap::new();
        assert!(RemoteConfig::from_lookup(lookup_from(&map)).unwrap().is_none());
    }

    #[test]
    fn remote_config_trims_and_validates_url() {
        let mut map = HashMap::new();
        map.insert("OUTBOX_REMOTE_URL", "https://api.example.com/ ");
        map.insert("OUTBOX_REMOTE_TOKEN", "secret-token");

        let config = RemoteConfig::from_lookup(lookup_from(&map))
            .unwrap()
            .unwrap();
        assert_eq!(config.base_url, "https://api.example.com");

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("secret-token"));
        assert!(debug_output.contains("[REDACTED]"));

        assert!(RemoteConfig::new("api.example.com", None).is_err());
    }

    #[test]
    fn storage_config_reads_page_cap() {
        let mut map = HashMap::new();
        assert_eq!(storage_from_lookup(lookup_from(&map)).unwrap().max_pages, None);

        map.insert("OUTBOX_MAX_DB_PAGES", "2048");
        assert_eq!(
            storage_from_lookup(lookup_from(&map)).unwrap().max_pages,
            Some(2048)
        );

        map.insert("OUTBOX_MAX_DB_PAGES", "-1");
        assert!(storage_from_lookup(lookup_from(&map)).is_err());
    }

    #[test]
    fn storage_config_reads_busy_timeout() {
        let mut map = HashMap::new();
        assert_eq!(
            storage_from_lookup(lookup_from(&map)).unwrap().busy_timeout,
            None
        );

        map.insert("OUTBOX_BUSY_TIMEOUT_MS", "750");
        assert_eq!(
            storage_from_lookup(lookup_from(&map)).unwrap().busy_timeout,
            Some(Duration::from_millis(750))
        );

        map.insert("OUTBOX_BUSY_TIMEOUT_MS", "soon");
        let err = storage_from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("OUTBOX_BUSY_TIMEOUT_MS"));
    }
}
