//! Impure I/O operations for the MQTT client
//!
//! Owns the rumqttc event loop. A spawned supervisor polls it, forwards
//! publishes to the ingest pipeline, re-issues subscriptions on every ConnAck,
//! and backs off between reconnect attempts until shutdown is requested.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::{MqttSection, ReconnectSection};
use crate::mqtt_span;
use crate::observability::metrics::metrics;
use crate::protocol::RawMessage;
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, QoS};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// How long `connect` waits for the first ConnAck before leaving it to the supervisor
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for UNSUBSCRIBE/DISCONNECT to reach the broker on shutdown
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Room in the rumqttc request queue beyond one slot per filter
const REQUEST_QUEUE_HEADROOM: usize = 10;

#[derive(Debug, Default)]
struct SessionHealth {
    connected_at: Option<Instant>,
    last_message_at: Option<Instant>,
    reconnect_count: u32,
}

/// Receive-only MQTT client for the vendor telemetry topics
pub struct MqttClient {
    client_id: String,
    client: AsyncClient,
    /// Taken by `connect`; the mutex keeps the client `Sync`
    event_loop: Mutex<Option<EventLoop>>,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    subscription_filters: Vec<String>,
    connect_timeout: Duration,
    event_loop_handle: Option<JoinHandle<()>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Option<watch::Sender<bool>>,
    message_forwarder: MessageForwarder,
    health: Arc<Mutex<SessionHealth>>,
}

impl MqttClient {
    /// Build a client; nothing touches the network until [`MqttClient::connect`]
    pub fn new(
        client_id: &str,
        config: MqttSection,
        reconnect: &ReconnectSection,
        subscription_filters: Vec<String>,
    ) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(client_id, &config)?;
        let (client, event_loop) = AsyncClient::new(
            mqtt_options,
            subscription_filters.len() * 2 + REQUEST_QUEUE_HEADROOM,
        );
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        Ok(MqttClient {
            client_id: client_id.to_string(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            config,
            reconnect_config: ReconnectConfig::from(reconnect),
            subscription_filters,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_loop_handle: None,
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx: None,
            message_forwarder: MessageForwarder::new(),
            health: Arc::new(Mutex::new(SessionHealth::default())),
        })
    }

    /// Override how long `connect` waits for the first ConnAck
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the channel that receives every accepted publish
    pub fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>) {
        self.message_forwarder.set_sender(sender);
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn subscription_filters(&self) -> &[String] {
        &self.subscription_filters
    }

    /// Wait until the state reaches `Connected`
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                if matches!(*state_rx.borrow_and_update(), ConnectionState::Connected) {
                    return Ok(());
                }
                if matches!(*state_rx.borrow(), ConnectionState::Closed) {
                    return Err(MqttError::ConnectionFailedStr("Session closed".to_string()));
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(MqttError::NotConnected {
                state: state_rx.borrow().clone(),
            }),
        }
    }

    /// Wait for the broker to accept the session
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<(), MqttError> {
        Self::wait_for_connection_confirmation(self.state_rx.clone(), timeout).await
    }

    /// Start the connection supervisor
    ///
    /// Returns once the broker has acknowledged the session, or after the
    /// connect timeout with the supervisor still retrying in the background.
    /// An unreachable broker is never an error here.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| MqttError::ConnectionFailedStr("Event loop already started".to_string()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            client: self.client.clone(),
            filters: self.subscription_filters.clone(),
            ignore_retained: self.config.ignore_retained,
            reconnect_config: self.reconnect_config.clone(),
            state_tx: self.state_tx.clone(),
            forwarder: self.message_forwarder.clone(),
            health: self.health.clone(),
        };
        let span = mqtt_span!(
            broker = %format!("{}:{}", self.config.host, self.config.port),
            client_id = %self.client_id
        );

        info!(
            host = %self.config.host,
            port = self.config.port,
            filters = ?self.subscription_filters,
            "Connecting to MQTT broker"
        );
        metrics().mqtt_connection_attempt();
        self.event_loop_handle = Some(tokio::spawn(
            supervisor.run(event_loop, shutdown_rx).instrument(span),
        ));

        if let Err(e) = self.wait_for_connection(self.connect_timeout).await {
            warn!(
                error = %e,
                "MQTT broker not reachable yet, retrying in background"
            );
        }
        Ok(())
    }

    /// Unsubscribe, close the session, and stop the supervisor
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
            debug!("Sent shutdown signal to connection supervisor");
        }

        if let Some(handle) = self.event_loop_handle.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(SESSION_DRAIN_TIMEOUT * 2, handle).await {
                Ok(Ok(())) => info!("MQTT supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("MQTT supervisor ended with error: {}", e);
                }
                Err(_) => {
                    warn!("MQTT supervisor didn't shut down gracefully, forcing abort");
                    abort.abort();
                }
                _ => {}
            }
        }

        self.shutdown_tx = None;
        if *self.state_rx.borrow() != ConnectionState::Closed {
            self.state_tx.send_replace(ConnectionState::Closed);
        }
        Ok(())
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Get health metrics for the connection
    pub fn get_health_metrics(&self) -> HealthMetrics {
        let health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        HealthMonitor::calculate_health_metrics(
            health.connected_at,
            health.last_message_at,
            health.reconnect_count,
        )
    }

    /// Sleep for `delay_ms` unless shutdown is requested first
    ///
    /// Returns true if the sleep completed, false if shutdown interrupted it.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}

enum Step {
    Shutdown,
    ShutdownChannelChanged,
    Polled(Result<Event, rumqttc::ConnectionError>),
}

/// Background task that owns the event loop
struct Supervisor {
    client: AsyncClient,
    filters: Vec<String>,
    ignore_retained: bool,
    reconnect_config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    forwarder: MessageForwarder,
    health: Arc<Mutex<SessionHealth>>,
}

impl Supervisor {
    async fn run(self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Starting MQTT connection supervisor");
        let mut reconnect_attempts = 0u32;

        loop {
            let step = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => match changed {
                    Ok(()) => Step::ShutdownChannelChanged,
                    Err(_) => Step::Shutdown,
                },
                polled = event_loop.poll() => Step::Polled(polled),
            };

            match step {
                Step::Shutdown => break,
                Step::ShutdownChannelChanged => {
                    if *shutdown_rx.borrow() {
                        self.close_session(&mut event_loop).await;
                        break;
                    }
                }
                Step::Polled(Ok(event)) => {
                    self.handle_event(event, &mut reconnect_attempts).await;
                }
                Step::Polled(Err(e)) => {
                    if !self
                        .handle_connection_error(e, &mut reconnect_attempts, &shutdown_rx)
                        .await
                    {
                        break;
                    }
                }
            }
        }

        self.transition(ConnectionEvent::SessionClosed);
        info!("MQTT connection supervisor stopped");
    }

    fn transition(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(&self.state_tx.borrow(), event);
        self.state_tx.send_replace(next);
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), ConnectionState::Connected)
    }

    async fn handle_event(&self, event: Event, reconnect_attempts: &mut u32) {
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::ConnectionAcknowledged { session_present } => {
                debug!(session_present, "ConnAck received");
                {
                    let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
                    health.connected_at = Some(Instant::now());
                    if *reconnect_attempts > 0 {
                        health.reconnect_count = health.reconnect_count.saturating_add(1);
                    }
                }
                *reconnect_attempts = 0;
                metrics().mqtt_connection_established();
                self.transition(ConnectionEvent::ConnAckReceived);
                self.resubscribe_to_topics();
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                self.health
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .last_message_at = Some(Instant::now());

                if !MessageHandler::should_forward(retain, self.ignore_retained) {
                    debug!(topic = %topic, "Ignoring retained message");
                    return;
                }
                let message = MessageHandler::build_raw_message(topic, payload, retain);
                if let Err(e) = self.forwarder.forward(message).await {
                    error!("Failed to forward MQTT message: {}", e);
                }
            }
            EventRoute::Disconnected => {
                metrics().mqtt_connection_lost();
                self.transition(ConnectionEvent::DisconnectedByBroker);
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                failures,
            } => {
                if failures > 0 {
                    warn!(packet_id, failures, "Broker rejected subscription filters");
                } else {
                    debug!(packet_id, "Subscription confirmed");
                }
            }
            EventRoute::DisconnectSent => debug!("DISCONNECT sent to broker"),
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Returns false when the supervisor should stop
    async fn handle_connection_error(
        &self,
        error: rumqttc::ConnectionError,
        reconnect_attempts: &mut u32,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> bool {
        if self.is_connected() {
            metrics().mqtt_connection_lost();
        } else {
            metrics().mqtt_connection_failed();
        }
        self.transition(ConnectionEvent::NetworkError(error.to_string()));

        // The watch guard must be released before the backoff sleep
        let shutdown_requested = *shutdown_rx.borrow();
        match HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &self.reconnect_config,
            shutdown_requested,
        ) {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                info!(attempt, delay_ms, "Reconnecting to MQTT broker after delay");

                if !MqttClient::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                    return false;
                }
                metrics().mqtt_connection_attempt();
                true
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
        }
    }

    /// Subscriptions do not survive a clean session, so every ConnAck re-issues them
    fn resubscribe_to_topics(&self) {
        for filter in &self.filters {
            match self.client.try_subscribe(filter, QoS::AtLeastOnce) {
                Ok(()) => debug!(filter = %filter, "Subscribed"),
                Err(e) => error!(filter = %filter, "Failed to subscribe: {}", e),
            }
        }
    }

    async fn close_session(&self, event_loop: &mut EventLoop) {
        if !self.is_connected() {
            debug!("No live session to close");
            return;
        }

        for filter in &self.filters {
            if let Err(e) = self.client.try_unsubscribe(filter) {
                warn!(filter = %filter, "Failed to queue unsubscribe: {}", e);
            }
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue disconnect: {}", e);
            return;
        }

        let drained = tokio::time::timeout(SESSION_DRAIN_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                metrics().mqtt_connection_lost();
                info!("MQTT session released");
            }
            Err(_) => warn!("Timed out releasing MQTT session"),
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>) {
        MqttClient::set_message_sender(self, sender);
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }

    fn connection_state(&self) -> ConnectionState {
        MqttClient::connection_state(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        // No async in Drop; call disconnect() for a clean session release
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
