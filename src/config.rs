//! Configuration for a broker session
//!
//! Loaded from TOML. Credentials are never stored in the file itself; the
//! file names the environment variables that hold them and they are resolved
//! when a session is created.

use crate::session::Credentials;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub subscriptions: SubscriptionsSection,
}

/// Broker endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and port (mqtt:// or mqtts://)
    pub url: String,
    /// Virtual namespace on the broker
    #[serde(default)]
    pub vpn: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

/// Session tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// How long a subscribe/unsubscribe may wait for its acknowledgement
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    /// Upper bound on connect(); absent means wait for a terminal broker event
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Handshake attempts made by the transport before reporting failure
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Capacity of the command queue and the lifecycle event stream
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
            connect_timeout_secs: None,
            connect_attempts: default_connect_attempts(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SessionSection {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

/// Topics subscribed on startup by the `run` command
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionsSection {
    #[serde(default)]
    pub topics: Vec<String>,
}

/// One hour
const MAX_SUBSCRIBE_TIMEOUT_MS: u64 = 3_600_000;
/// One day
const MAX_CONNECT_TIMEOUT_SECS: u64 = 86_400;

fn default_subscribe_timeout_ms() -> u64 {
    10_000
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_event_capacity() -> usize {
    256
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration pointing at a broker URL
    pub fn for_broker<S: Into<String>>(url: S) -> Self {
        Self {
            broker: BrokerSection {
                url: url.into(),
                vpn: None,
                username_env: None,
                password_env: None,
            },
            session: SessionSection::default(),
            subscriptions: SubscriptionsSection::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.broker.url)?;

        if self.session.subscribe_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.subscribe_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.session.subscribe_timeout_ms > MAX_SUBSCRIBE_TIMEOUT_MS {
            return Err(ConfigError::InvalidConfig(format!(
                "session.subscribe_timeout_ms must be at most {MAX_SUBSCRIBE_TIMEOUT_MS}"
            )));
        }
        if let Some(secs) = self.session.connect_timeout_secs {
            if secs == 0 || secs > MAX_CONNECT_TIMEOUT_SECS {
                return Err(ConfigError::InvalidConfig(format!(
                    "session.connect_timeout_secs must be between 1 and {MAX_CONNECT_TIMEOUT_SECS}"
                )));
            }
        }
        if self.session.connect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.connect_attempts must be greater than 0".to_string(),
            ));
        }
        if self.session.event_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.event_capacity must be greater than 0".to_string(),
            ));
        }
        if let Some(topic) = self
            .subscriptions
            .topics
            .iter()
            .find(|topic| topic.trim().is_empty())
        {
            return Err(ConfigError::InvalidConfig(format!(
                "subscription topic '{topic}' must not be empty"
            )));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Resolve endpoint credentials from the environment
    ///
    /// A configured username variable must be set; the password variable is
    /// optional and defaults to an empty password.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let username = match &self.broker.username_env {
            Some(name) => Some(Self::get_env_var_required(name)?),
            None => None,
        };
        let password = Self::get_env_var_optional(self.broker.password_env.as_ref());

        Ok(Credentials {
            host: self.broker.url.clone(),
            vpn: self.broker.vpn.clone(),
            username,
            password,
        })
    }
}

/// Validate that a broker URL parses, has a host and uses a supported scheme
pub fn validate_broker_url(broker_url: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "mqtt" | "mqtts" | "tcp" | "ssl") {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (unsupported scheme '{}')",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
    }

    Ok(url)
}
