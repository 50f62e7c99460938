use crate::auth::Credentials;
use crate::client::ClientOptions;
use crate::token::ChannelMode;
use feedsockets::FixedDelay;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment override for the REST base URL
pub const ENV_REST_URL: &str = "KUCOIN_REST_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Stream client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// REST API base URL used for token bootstrap
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    /// Request private-channel tokens (requires credentials)
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Ping interval when the token response does not carry one
    #[serde(default = "default_ping_interval_ms")]
    pub default_ping_interval_ms: u64,
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub topics: Vec<TopicConfig>,

    /// API credentials from .env (not in YAML)
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub topic: String,
    #[serde(default)]
    pub private: bool,
    /// Ask the server for an ack
    #[serde(default = "default_true")]
    pub response: bool,
}

fn default_rest_base_url() -> String {
    "https://api.kucoin.com".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_inbound_buffer() -> usize {
    1024
}

fn default_event_buffer() -> usize {
    256
}

fn default_shutdown_timeout_ms() -> u64 {
    1000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl StreamConfig {
    /// Load configuration from YAML file, then apply environment overrides
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml_str(&yaml_content)?;

        dotenv::dotenv().ok(); // Don't fail if .env doesn't exist
        config.apply_env();

        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without touching the environment or validating
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_REST_URL) {
            if !url.trim().is_empty() {
                info!("Overriding REST URL from environment variable");
                self.rest_base_url = url;
            }
        }
        if self.credentials.is_none() {
            self.credentials = Credentials::from_env();
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.rest_base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "rest_base_url must not be empty".to_string(),
            ));
        }

        if self.reconnect_delay_secs == 0 {
            return Err(ConfigError::ValidationError(
                "reconnect_delay_secs must be greater than 0".to_string(),
            ));
        }

        if self.inbound_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "inbound_buffer must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        if self.default_ping_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "default_ping_interval_ms must be greater than 0".to_string(),
            ));
        }

        let needs_credentials = self.private || self.topics.iter().any(|t| t.private);
        if needs_credentials && self.credentials.is_none() {
            return Err(ConfigError::EnvVarMissing(format!(
                "{}, {} and {} are required for private channels",
                crate::auth::ENV_API_KEY,
                crate::auth::ENV_API_SECRET,
                crate::auth::ENV_API_PASSPHRASE
            )));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        if let Some(topic) = self.topics.iter().find(|t| t.topic.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "topic entries must not be empty: {:?}",
                topic
            )));
        }

        Ok(())
    }

    pub fn mode(&self) -> ChannelMode {
        if self.private {
            ChannelMode::Private
        } else {
            ChannelMode::Public
        }
    }

    /// Client options derived from this configuration
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::new()
            .with_mode(self.mode())
            .with_backoff(FixedDelay::new(Duration::from_secs(self.reconnect_delay_secs)))
            .with_inbound_buffer(self.inbound_buffer)
            .with_event_buffer(self.event_buffer)
            .with_shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
            .with_default_ping_interval(Duration::from_millis(self.default_ping_interval_ms))
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  REST URL: {}", self.rest_base_url);
        info!("  Channel: {:?}", self.mode());
        info!("  Reconnect delay: {} seconds", self.reconnect_delay_secs);
        info!("  Fallback ping interval: {} ms", self.default_ping_interval_ms);
        info!("  Credentials: {}", if self.credentials.is_some() { "present" } else { "absent" });
        info!("  Topics: {}", self.topics.len());
        for topic in &self.topics {
            info!("    {} (private: {}, ack: {})", topic.topic, topic.private, topic.response);
        }
    }
}
