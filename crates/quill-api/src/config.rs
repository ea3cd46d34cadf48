use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;

use quill_core::config::{optional_trimmed, value_or_default, ConfigError};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Bearer token required on `/v1` routes when set.
    pub api_token: Option<String>,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "QUILL_API_BIND_ADDR", DEFAULT_BIND_ADDR);
        if bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "QUILL_API_BIND_ADDR must be a socket address like {DEFAULT_BIND_ADDR}"
            )));
        }

        Ok(Self {
            bind_addr,
            api_token: optional_trimmed(&lookup, "QUILL_API_TOKEN"),
        })
    }
}
