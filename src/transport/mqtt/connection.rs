//! Pure connection state management for the MQTT client
//!
//! Connection state, backoff calculation, and option construction. Nothing in
//! here touches the network.

use crate::config::{MqttSection, ReconnectSection};
use rumqttc::MqttOptions;
use std::time::Duration;
use thiserror::Error;

/// Smallest keep-alive rumqttc accepts
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Largest packet accepted from or sent to the broker
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Connection state for the MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state, first connection attempt in flight
    Connecting,
    /// ConnAck received and subscriptions issued
    Connected,
    /// Connection lost with reason; a retry is pending
    Disconnected(String),
    /// Waiting out the backoff before the given attempt
    Reconnecting(u32),
    /// Session released after an explicit disconnect
    Closed,
}

/// Exponential reconnect backoff; retries never give up
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSection::default())
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            initial_delay_ms: section.initial_delay_ms,
            max_delay_ms: section.max_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based): `initial * 2^(attempt-1)`, capped at max
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Invalid MQTT options: {0}")]
    InvalidOptions(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Build rumqttc options for the configured broker
///
/// `client_id` should already carry the per-process suffix so two bridge
/// instances never steal each other's session.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let host = config.host.trim();
    if host.is_empty() {
        return Err(MqttError::InvalidBroker("broker host is empty".to_string()));
    }
    if config.port == 0 {
        return Err(MqttError::InvalidBroker(format!("{host}:0")));
    }
    if config.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
        return Err(MqttError::InvalidOptions(format!(
            "keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}, got {}",
            config.keep_alive_secs
        )));
    }

    let mut options = MqttOptions::new(client_id, host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    Ok(options)
}
