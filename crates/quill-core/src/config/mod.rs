//! Environment-driven settings for clients that sync against a remote store.
//!
//! Values are read through a lookup closure so tests can feed a map instead
//! of mutating the process environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::sync::config::{
    RetryPolicy, SyncConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_PUSH_BATCH_SIZE,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::store::LocalStore;
use crate::sync::{HttpRemote, SyncResult};
use crate::util::is_http_url;

const MAX_ATTEMPTS_RANGE: (u32, u32) = (1, 100);
const BATCH_SIZE_RANGE: (usize, usize) = (1, 1_000);
const INTERVAL_SECS_RANGE: (u64, u64) = (1, 86_400);
const TIMEOUT_SECS_RANGE: (u64, u64) = (1, 600);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sync settings resolved from `QUILL_*` environment variables.
#[derive(Clone)]
pub struct SyncSettings {
    pub sync_url: String,
    pub sync_token: Option<String>,
    pub owner_id: String,
    pub max_attempts: u32,
    pub batch_size: usize,
    pub sync_interval: Option<Duration>,
    pub request_timeout: Duration,
}

impl fmt::Debug for SyncSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSettings")
            .field("sync_url", &self.sync_url)
            .field("sync_token", &self.sync_token.as_ref().map(|_| "[REDACTED]"))
            .field("owner_id", &self.owner_id)
            .field("max_attempts", &self.max_attempts)
            .field("batch_size", &self.batch_size)
            .field("sync_interval", &self.sync_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let sync_url = trim_trailing(&required_trimmed(&lookup, "QUILL_SYNC_URL")?).to_string();
        if !is_http_url(&sync_url) {
            return Err(ConfigError::Invalid(
                "QUILL_SYNC_URL must start with http:// or https://".to_string(),
            ));
        }

        let owner_id = required_trimmed(&lookup, "QUILL_OWNER_ID")?;
        let sync_token = optional_trimmed(&lookup, "QUILL_SYNC_TOKEN");

        let max_attempts = parse_in_range(
            &lookup,
            "QUILL_SYNC_MAX_ATTEMPTS",
            DEFAULT_MAX_ATTEMPTS,
            MAX_ATTEMPTS_RANGE,
        )?;
        let batch_size = parse_in_range(
            &lookup,
            "QUILL_SYNC_BATCH_SIZE",
            DEFAULT_PUSH_BATCH_SIZE,
            BATCH_SIZE_RANGE,
        )?;
        let request_timeout = Duration::from_secs(parse_in_range(
            &lookup,
            "QUILL_SYNC_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
            TIMEOUT_SECS_RANGE,
        )?);

        // Unset means no automatic drains.
        let sync_interval = match optional_trimmed(&lookup, "QUILL_SYNC_INTERVAL_SECS") {
            Some(raw) => Some(Duration::from_secs(check_range(
                "QUILL_SYNC_INTERVAL_SECS",
                parse_number(&raw, "QUILL_SYNC_INTERVAL_SECS")?,
                INTERVAL_SECS_RANGE,
            )?)),
            None => None,
        };

        Ok(Self {
            sync_url,
            sync_token,
            owner_id,
            max_attempts,
            batch_size,
            sync_interval,
            request_timeout,
        })
    }

    /// Attempt limit for queued operations.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    /// Open the local store at `path` with the configured attempt limit.
    pub fn open_store(&self, path: impl AsRef<Path>) -> crate::Result<LocalStore> {
        LocalStore::open(path, self.retry_policy())
    }

    /// Engine configuration for these settings.
    pub fn sync_config(&self) -> SyncConfig {
        let config = SyncConfig::new(self.owner_id.clone())
            .with_push_batch_size(self.batch_size)
            .with_request_timeout(self.request_timeout);
        match self.sync_interval {
            Some(interval) => config.with_sync_interval(interval),
            None => config,
        }
    }

    pub fn http_remote(&self) -> SyncResult<HttpRemote> {
        HttpRemote::new(
            &self.sync_url,
            self.sync_token.clone(),
            self.request_timeout,
        )
    }
}

fn parse_in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
    range: (T, T),
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    match optional_trimmed(lookup, name) {
        Some(raw) => check_range(name, parse_number(&raw, name)?, range),
        None => Ok(default),
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, ConfigError> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be a whole number")))
}

fn check_range<T>(name: &str, value: T, (min, max): (T, T)) -> Result<T, ConfigError>
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

pub fn value_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

pub fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

pub fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}
