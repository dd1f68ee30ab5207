//! Configuration for the mower bridge
//!
//! Loaded from a TOML file. Everything except the broker host has a default;
//! an empty host or a zero port is the one configuration error the bridge
//! refuses to start with.

use crate::protocol::{TopicError, TopicMatcher};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub staleness: StalenessSection,
    #[serde(default)]
    pub notifier: NotifierSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Broker connection; the broker is unauthenticated so there are no credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix for the MQTT client id; a per-process suffix is appended
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Skip retained messages the broker replays on subscribe
    #[serde(default)]
    pub ignore_retained: bool,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "mowerlink".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    /// Vendor topic prefix, giving `/{prefix}/+/update`
    #[serde(default = "default_topic_prefix")]
    pub prefix: String,
    /// Extra filters, each with exactly one `+` for the device id
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_topic_prefix() -> String {
    "device".to_string()
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            prefix: default_topic_prefix(),
            patterns: Vec::new(),
        }
    }
}

/// Exponential backoff between reconnect attempts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StalenessSection {
    /// Silence after which a device is reported offline
    #[serde(default = "default_threshold_secs")]
    pub threshold_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_threshold_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for StalenessSection {
    fn default() -> Self {
        Self {
            threshold_secs: default_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifierSection {
    /// Change-sets buffered per observer before new ones are dropped
    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,
}

fn default_observer_capacity() -> usize {
    crate::notify::DEFAULT_OBSERVER_CAPACITY
}

impl Default for NotifierSection {
    fn default() -> Self {
        Self {
            observer_capacity: default_observer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
    /// Manufacturer reported in device info
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_port() -> u16 {
    8080
}

fn default_manufacturer() -> String {
    "Sunseeker".to_string()
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            port: default_health_port(),
            manufacturer: default_manufacturer(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Invalid topic pattern: {0}")]
    InvalidTopic(#[from] TopicError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file without validating it, so callers can
    /// apply overrides before [`BridgeConfig::validate`]
    pub fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration pointing at `host:port`
    pub fn for_broker(host: impl Into<String>, port: u16) -> Self {
        Self {
            mqtt: MqttSection {
                host: host.into(),
                port,
                client_id: default_client_id(),
                keep_alive_secs: default_keep_alive(),
                ignore_retained: false,
            },
            topics: TopicsSection::default(),
            reconnect: ReconnectSection::default(),
            staleness: StalenessSection::default(),
            notifier: NotifierSection::default(),
            health: HealthSection::default(),
        }
    }

    /// Replace broker host and/or port, e.g. from command-line flags
    pub fn apply_broker_overrides(&mut self, host: Option<String>, port: Option<u16>) {
        if let Some(host) = host {
            self.mqtt.host = host;
        }
        if let Some(port) = port {
            self.mqtt.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker(&self.mqtt.host, self.mqtt.port)?;

        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.initial_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "reconnect.max_delay_ms ({}) is smaller than reconnect.initial_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.initial_delay_ms
            )));
        }
        if self.staleness.threshold_secs == 0 || self.staleness.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "staleness threshold and sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.notifier.observer_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "notifier.observer_capacity must be greater than zero".to_string(),
            ));
        }

        self.topic_matcher()?;
        Ok(())
    }

    /// Build the topic matcher described by the `[topics]` section
    pub fn topic_matcher(&self) -> Result<TopicMatcher, ConfigError> {
        Ok(TopicMatcher::from_prefix(
            &self.topics.prefix,
            &self.topics.patterns,
        )?)
    }

    /// Client id sent to the broker, unique per process
    pub fn session_client_id(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.mqtt.client_id, &suffix[..8])
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness.threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.staleness.sweep_interval_secs)
    }
}

/// Broker address must name a host and a usable port
fn validate_broker(host: &str, port: u16) -> Result<(), ConfigError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ConfigError::InvalidBroker(
            "mqtt.host must not be empty".to_string(),
        ));
    }
    if host.contains("://") || host.contains('/') || host.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidBroker(format!(
            "mqtt.host '{host}' must be a bare hostname or IP address"
        )));
    }
    if port == 0 {
        return Err(ConfigError::InvalidBroker(
            "mqtt.port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}
