//! Bridge lifecycle management
//!
//! Owns the transport and every background task. Startup order: ingest worker,
//! transport session, staleness sweeper, status server. Shutdown runs in
//! reverse, except that the ingest worker is stopped last so it can finish the
//! messages the transport already delivered.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::ingest::{IngestPipeline, DEFAULT_INGEST_CAPACITY};
use crate::notify::{ChangeNotifier, ChangeSubscription};
use crate::observability::health::HealthServer;
use crate::observability::metrics::metrics;
use crate::protocol::{RawMessage, TopicMatcher};
use crate::state::{DeviceRegistry, DeviceState, StalenessSweeper};
use crate::transport::mqtt::MqttClient;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Upper bound on waiting for the ingest worker to drain
const INGEST_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge between a mower telemetry broker and the host platform
pub struct Bridge<T>
where
    T: Transport + 'static,
{
    config: BridgeConfig,
    transport: T,
    matcher: TopicMatcher,
    registry: DeviceRegistry,
    notifier: ChangeNotifier,
    background_shutdown: Option<watch::Sender<bool>>,
    ingest_shutdown: Option<watch::Sender<bool>>,
    ingest_handle: Option<JoinHandle<usize>>,
    sweeper_handle: Option<JoinHandle<()>>,
    health_handle: Option<JoinHandle<()>>,
}

impl Bridge<MqttClient> {
    /// Bridge backed by the real MQTT client described in `config`
    pub fn with_mqtt(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let matcher = config.topic_matcher()?;
        let client = MqttClient::new(
            &config.session_client_id(),
            config.mqtt.clone(),
            &config.reconnect,
            matcher.subscription_filters(),
        )?;
        Self::new(config, client)
    }
}

impl<T> Bridge<T>
where
    T: Transport + 'static,
{
    /// Create a bridge over an already-built transport
    pub fn new(config: BridgeConfig, transport: T) -> BridgeResult<Self> {
        config.validate()?;
        let matcher = config.topic_matcher()?;
        let notifier = ChangeNotifier::new(config.notifier.observer_capacity);

        Ok(Self {
            config,
            transport,
            matcher,
            registry: DeviceRegistry::new(),
            notifier,
            background_shutdown: None,
            ingest_shutdown: None,
            ingest_handle: None,
            sweeper_handle: None,
            health_handle: None,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Shared handle on the reconciled device states
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Register a change observer; may be called before or after `start`
    pub fn subscribe(&self) -> ChangeSubscription {
        self.notifier.register()
    }

    pub fn get(&self, id: &str) -> Option<DeviceState> {
        self.registry.get(id)
    }

    pub fn list(&self) -> Vec<DeviceState> {
        self.registry.list()
    }

    pub fn is_running(&self) -> bool {
        self.ingest_handle.is_some()
    }

    /// Start ingesting
    pub async fn start(&mut self) -> BridgeResult<()> {
        if self.is_running() {
            return Err(BridgeError::AlreadyRunning);
        }
        info!(
            broker = %format!("{}:{}", self.config.mqtt.host, self.config.mqtt.port),
            filters = ?self.matcher.subscription_filters(),
            "Starting mower bridge"
        );
        metrics().set_bridge_state("starting");

        let (message_tx, message_rx) = mpsc::channel::<RawMessage>(DEFAULT_INGEST_CAPACITY);
        let (ingest_shutdown_tx, ingest_shutdown_rx) = watch::channel(false);
        let pipeline = IngestPipeline::new(
            self.matcher.clone(),
            self.registry.clone(),
            self.notifier.clone(),
        );
        let ingest_handle = tokio::spawn(pipeline.run(message_rx, ingest_shutdown_rx));

        self.transport.set_message_sender(message_tx);
        if let Err(e) = self.transport.connect().await {
            error!("Transport failed to start: {}", e);
            let _ = ingest_shutdown_tx.send(true);
            let _ = ingest_handle.await;
            metrics().set_bridge_state("stopped");
            return Err(BridgeError::transport(e));
        }
        info!("Transport session started");

        let (background_tx, background_rx) = watch::channel(false);
        let sweeper = StalenessSweeper::new(
            self.registry.clone(),
            self.notifier.clone(),
            self.config.staleness_threshold(),
            self.config.sweep_interval(),
        );
        self.sweeper_handle = Some(sweeper.spawn(background_rx.clone()));

        if self.config.health.enabled {
            let server = Arc::new(HealthServer::new(
                self.config.health.port,
                self.registry.clone(),
                self.config.health.manufacturer.clone(),
            ));
            self.health_handle = Some(tokio::spawn(server.run(background_rx)));
            info!(port = self.config.health.port, "Status server started");
        }

        self.background_shutdown = Some(background_tx);
        self.ingest_shutdown = Some(ingest_shutdown_tx);
        self.ingest_handle = Some(ingest_handle);
        metrics().set_bridge_state("running");
        info!("Mower bridge running");
        Ok(())
    }

    /// Stop all tasks and release the broker session
    ///
    /// Device state stays readable through [`Bridge::registry`] afterwards.
    pub async fn shutdown(&mut self) -> BridgeResult<()> {
        let Some(ingest_handle) = self.ingest_handle.take() else {
            return Err(BridgeError::NotRunning);
        };
        info!("Shutting down mower bridge");
        metrics().set_bridge_state("stopping");

        if let Some(background_tx) = self.background_shutdown.take() {
            let _ = background_tx.send(true);
        }
        for handle in [self.sweeper_handle.take(), self.health_handle.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Background task shutdown error: {}", e);
                }
            }
        }

        let transport_result = self.transport.disconnect().await;
        if let Err(e) = &transport_result {
            warn!("Transport disconnect failed: {}", e);
        }

        if let Some(ingest_tx) = self.ingest_shutdown.take() {
            let _ = ingest_tx.send(true);
        }
        let abort = ingest_handle.abort_handle();
        match tokio::time::timeout(INGEST_DRAIN_TIMEOUT, ingest_handle).await {
            Ok(Ok(processed)) => info!(processed, "Ingest pipeline drained"),
            Ok(Err(e)) => error!("Ingest pipeline ended with error: {}", e),
            Err(_) => {
                warn!("Ingest pipeline did not drain in time, aborting");
                abort.abort();
            }
        }

        metrics().set_bridge_state("stopped");
        info!("Mower bridge shutdown complete");
        transport_result.map_err(BridgeError::transport)
    }
}

impl<T> Drop for Bridge<T>
where
    T: Transport + 'static,
{
    fn drop(&mut self) {
        for handle in [
            self.sweeper_handle.take(),
            self.health_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        if let Some(handle) = self.ingest_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::for_broker("localhost", 1883);
        config.health.enabled = false;
        config
    }

    #[test]
    fn test_new_rejects_invalid_broker() {
        let result = Bridge::new(BridgeConfig::for_broker("", 1883), MockTransport::new());
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_with_mqtt_builds_client() {
        let bridge = Bridge::with_mqtt(config()).unwrap();
        assert_eq!(
            bridge.transport().subscription_filters(),
            &["/device/+/update".to_string()]
        );
        assert!(bridge.transport().client_id().starts_with("mowerlink-"));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut bridge = Bridge::new(config(), transport).unwrap();

        bridge.start().await.unwrap();
        assert!(bridge.is_running());
        assert!(handle.is_connected());
        assert!(matches!(
            bridge.start().await,
            Err(BridgeError::AlreadyRunning)
        ));

        bridge.shutdown().await.unwrap();
        assert!(!bridge.is_running());
        assert!(!handle.is_connected());
        assert!(matches!(
            bridge.shutdown().await,
            Err(BridgeError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_start_propagates_transport_failure() {
        let mut bridge = Bridge::new(config(), MockTransport::with_failure()).unwrap();
        let result = bridge.start().await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn test_messages_flow_to_registry() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut bridge = Bridge::new(config(), transport).unwrap();
        let mut observer = bridge.subscribe();

        bridge.start().await.unwrap();
        handle
            .inject_json("/device/ABC123/update", &serde_json::json!({"power": 64}))
            .await
            .unwrap();

        let change_set = tokio::time::timeout(Duration::from_secs(1), observer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change_set.device_id.as_str(), "ABC123");
        assert_eq!(bridge.list().len(), 1);

        bridge.shutdown().await.unwrap();
        assert!(bridge.get("ABC123").is_some());
    }
}
