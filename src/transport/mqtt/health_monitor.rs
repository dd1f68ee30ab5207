//! Pure health monitoring and reconnection logic for the MQTT client
//!
//! Reconnection decisions, state transitions, and connection health
//! calculation. The supervisor in [`super::client`] owns the I/O.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Broker silence after which a connected session counts as unhealthy
const QUIET_BROKER_THRESHOLD: Duration = Duration::from_secs(300);

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether to retry after `current_attempts` consecutive failures
    ///
    /// Only a shutdown request stops retrying.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event
    pub fn determine_next_state(
        current_state: &ConnectionState,
        event: ConnectionEvent,
    ) -> ConnectionState {
        let next = match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::SessionClosed => ConnectionState::Closed,
        };
        Self::log_state_transition(current_state, &next);
        next
    }

    /// Calculate health metrics for connection
    pub fn calculate_health_metrics(
        connect_time: Option<Instant>,
        last_message_time: Option<Instant>,
        reconnect_count: u32,
    ) -> HealthMetrics {
        let now = Instant::now();

        let uptime = connect_time.map(|t| now.duration_since(t));
        let time_since_last_message = last_message_time.map(|t| now.duration_since(t));

        HealthMetrics {
            uptime,
            time_since_last_message,
            reconnect_count,
            is_healthy: Self::determine_health_status(uptime, time_since_last_message),
        }
    }

    fn determine_health_status(
        uptime: Option<Duration>,
        time_since_last_message: Option<Duration>,
    ) -> bool {
        match (uptime, time_since_last_message) {
            (Some(_), None) => true,
            (Some(_), Some(last_msg)) => last_msg < QUIET_BROKER_THRESHOLD,
            _ => false,
        }
    }

    /// Log connection state transition
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(attempt, "MQTT reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            (_, ConnectionState::Disconnected(reason)) => {
                warn!(reason = %reason, "MQTT connection attempt failed");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!(attempt, "Scheduling MQTT reconnection attempt");
            }
            (_, ConnectionState::Closed) => {
                info!("MQTT session closed");
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Wait `delay_ms`, then poll the event loop again
    Proceed { attempt: u32, delay_ms: u64 },
    /// Stop retrying - shutdown requested
    AbortShutdownRequested,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    SessionClosed,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    /// Time since the current session was established
    pub uptime: Option<Duration>,
    /// Time since the last publish arrived from the broker
    pub time_since_last_message: Option<Duration>,
    /// Successful reconnections since start
    pub reconnect_count: u32,
    pub is_healthy: bool,
}
