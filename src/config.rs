//! Connection configuration and settings-file loading
//!
//! [`ConnectionConfig`] is the validated description of how to reach a
//! device's broker. It can only be obtained through
//! [`ConnectionConfigBuilder::build`], which checks every field once and
//! either returns a fully valid value or the first violated constraint.
//!
//! [`Settings`] is the TOML file form used by the CLI and by applications
//! that prefer file-based configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use thiserror::Error;

use crate::client::ClientOptions;

/// Default MQTT broker port
pub const DEFAULT_PORT: u16 = 1883;
/// Default keep-alive interval in seconds
pub const DEFAULT_KEEPALIVE: u16 = 60;

/// First violated constraint found while validating connection settings
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Host cannot be empty")]
    EmptyHost,
    #[error("MQTT username cannot be empty")]
    EmptyUsername,
    #[error("MQTT password cannot be empty")]
    EmptyPassword,
    #[error("MQTT topics list cannot be empty")]
    EmptyTopics,
    #[error("Port must be between 1 and 65535, got {0}")]
    PortOutOfRange(i64),
    #[error("Keepalive must be positive and at most 65535 seconds, got {0}")]
    InvalidKeepalive(i64),
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyHost => "host",
            ValidationError::EmptyUsername => "mqtt_username",
            ValidationError::EmptyPassword => "mqtt_password",
            ValidationError::EmptyTopics => "mqtt_topics",
            ValidationError::PortOutOfRange(_) => "port",
            ValidationError::InvalidKeepalive(_) => "keepalive",
        }
    }
}

/// Validated connection parameters for one broker
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    mqtt_username: String,
    mqtt_password: String,
    mqtt_topics: Vec<String>,
    port: u16,
    keepalive: u16,
    client_id: String,
}

impl ConnectionConfig {
    /// Start building a config from the required fields
    pub fn builder<I, T>(
        host: impl Into<String>,
        mqtt_username: impl Into<String>,
        mqtt_password: impl Into<String>,
        mqtt_topics: I,
    ) -> ConnectionConfigBuilder
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        ConnectionConfigBuilder {
            host: host.into(),
            mqtt_username: mqtt_username.into(),
            mqtt_password: mqtt_password.into(),
            mqtt_topics: mqtt_topics.into_iter().map(Into::into).collect(),
            port: i64::from(DEFAULT_PORT),
            keepalive: i64::from(DEFAULT_KEEPALIVE),
            client_id: String::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn mqtt_username(&self) -> &str {
        &self.mqtt_username
    }

    pub fn mqtt_password(&self) -> &str {
        &self.mqtt_password
    }

    /// Topics subscribed on every successful connect, in order
    pub fn mqtt_topics(&self) -> &[String] {
        &self.mqtt_topics
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn keepalive(&self) -> u16 {
        self.keepalive
    }

    /// Client identifier; empty means the transport picks one
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("mqtt_username", &self.mqtt_username)
            .field("mqtt_password", &"***")
            .field("mqtt_topics", &self.mqtt_topics)
            .field("port", &self.port)
            .field("keepalive", &self.keepalive)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Builder for [`ConnectionConfig`]
///
/// Numeric fields take `i64` so out-of-range input from settings files
/// reaches the validator instead of failing a narrowing conversion.
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    host: String,
    mqtt_username: String,
    mqtt_password: String,
    mqtt_topics: Vec<String>,
    port: i64,
    keepalive: i64,
    client_id: String,
}

impl ConnectionConfigBuilder {
    pub fn port(mut self, port: i64) -> Self {
        self.port = port;
        self
    }

    pub fn keepalive(mut self, seconds: i64) -> Self {
        self.keepalive = seconds;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Validate and build the config
    ///
    /// Checks run in order: host, username, password, topics, port, keepalive.
    pub fn build(self) -> Result<ConnectionConfig, ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        if self.mqtt_username.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        if self.mqtt_password.is_empty() {
            return Err(ValidationError::EmptyPassword);
        }
        if self.mqtt_topics.is_empty() {
            return Err(ValidationError::EmptyTopics);
        }
        let port = u16::try_from(self.port)
            .ok()
            .filter(|port| *port >= 1)
            .ok_or(ValidationError::PortOutOfRange(self.port))?;
        let keepalive = u16::try_from(self.keepalive)
            .ok()
            .filter(|seconds| *seconds >= 1)
            .ok_or(ValidationError::InvalidKeepalive(self.keepalive))?;

        Ok(ConnectionConfig {
            host: self.host,
            mqtt_username: self.mqtt_username,
            mqtt_password: self.mqtt_password,
            mqtt_topics: self.mqtt_topics,
            port,
            keepalive,
            client_id: self.client_id,
        })
    }
}

/// Settings file contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub connection: ConnectionSection,
    #[serde(default)]
    pub client: ClientSection,
}

/// `[connection]` table
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    pub host: String,
    pub username: String,
    /// Inline password; takes precedence over `password_env`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    pub topics: Vec<String>,
    #[serde(default = "default_port")]
    pub port: i64,
    #[serde(default = "default_keepalive")]
    pub keepalive: i64,
    #[serde(default)]
    pub client_id: String,
}

impl fmt::Debug for ConnectionSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSection")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_env", &self.password_env)
            .field("topics", &self.topics)
            .field("port", &self.port)
            .field("keepalive", &self.keepalive)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// `[client]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Upper bound of the inbound message buffer
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
        }
    }
}

fn default_port() -> i64 {
    i64::from(DEFAULT_PORT)
}

fn default_keepalive() -> i64 {
    i64::from(DEFAULT_KEEPALIVE)
}

fn default_max_queue_size() -> usize {
    crate::client::DEFAULT_MAX_QUEUE_SIZE
}

/// Settings loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("No password configured: set `password` or `password_env`")]
    MissingPassword,
    #[error("Invalid connection settings: {0}")]
    Validation(#[from] ValidationError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.client_options()?;
        Ok(settings)
    }

    /// Resolve the password and validate the `[connection]` table
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let section = &self.connection;
        let password = match (&section.password, &section.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(env_name)) => std::env::var(env_name)
                .map_err(|_| ConfigError::EnvVarNotFound(env_name.clone()))?,
            (None, None) => return Err(ConfigError::MissingPassword),
        };

        let config = ConnectionConfig::builder(
            section.host.clone(),
            section.username.clone(),
            password,
            section.topics.iter().cloned(),
        )
        .port(section.port)
        .keepalive(section.keepalive)
        .client_id(section.client_id.clone())
        .build()?;

        Ok(config)
    }

    /// Client tuning from the `[client]` table
    pub fn client_options(&self) -> Result<ClientOptions, ConfigError> {
        let max_queue_size = NonZeroUsize::new(self.client.max_queue_size).ok_or_else(|| {
            ConfigError::InvalidConfig("client.max_queue_size must be at least 1".to_string())
        })?;
        Ok(ClientOptions { max_queue_size })
    }

    /// Copy with any inline password replaced, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.connection.password.is_some() {
            copy.connection.password = Some("***".to_string());
        }
        copy
    }
}
