//! Error types for the mower bridge
//!
//! Per-message failures (decode errors, unknown topics) are logged and
//! counted by the ingest pipeline, never returned. `BridgeError` covers the
//! failures that stop the bridge from starting or shutting down cleanly.

use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Bridge is already running")]
    AlreadyRunning,

    #[error("Bridge is not running")]
    NotRunning,
}

impl BridgeError {
    /// Wrap an arbitrary transport failure
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }

    /// Only a bad broker address or topic pattern is fatal at startup
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Config(_)
                | BridgeError::Mqtt(MqttError::InvalidBroker(_))
                | BridgeError::Mqtt(MqttError::InvalidOptions(_))
        )
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
