//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for the MQTT client. Tests keep a
//! [`MockTransportHandle`] to inject broker messages after the transport has
//! been moved into a [`crate::bridge::Bridge`].

use crate::protocol::RawMessage;
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct MockShared {
    sender: RwLock<Option<mpsc::Sender<RawMessage>>>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    shared: Arc<MockShared>,
    pub should_fail: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose `connect` always fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            shared: self.shared.clone(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.shared.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(MqttError::ConnectionFailedStr(
                "Mock connection failure".to_string(),
            ));
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.shared.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_message_sender(&self, sender: mpsc::Sender<RawMessage>) {
        *self
            .shared
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else if self.should_fail {
            ConnectionState::Disconnected("Mock disconnection".to_string())
        } else {
            ConnectionState::Connecting
        }
    }
}

/// Test-side view of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    shared: Arc<MockShared>,
}

impl MockTransportHandle {
    /// Deliver a message as if the broker had sent it
    pub async fn inject(&self, message: RawMessage) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: ConnectionState::Disconnected("Mock transport not connected".to_string()),
            });
        }
        let sender = self
            .shared
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| MqttError::ConnectionFailedStr("No message sender set".to_string()))?;

        sender
            .send(message)
            .await
            .map_err(|e| MqttError::ConnectionFailedStr(format!("Ingest pipeline closed: {e}")))
    }

    /// Deliver raw bytes on `topic`, stamped now
    pub async fn inject_bytes(&self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        self.inject(RawMessage::new(topic, payload.to_vec())).await
    }

    /// Deliver a JSON document on `topic`, stamped now
    pub async fn inject_json(&self, topic: &str, payload: &Value) -> Result<(), MqttError> {
        self.inject_bytes(topic, payload.to_string().as_bytes()).await
    }

    /// Deliver a JSON document with an explicit receive time
    pub async fn inject_json_at(
        &self,
        topic: &str,
        payload: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<(), MqttError> {
        self.inject(RawMessage::new(topic, payload.to_string().into_bytes()).received_at(received_at))
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Simulate a dropped broker session
    pub fn drop_connection(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    /// Simulate the session coming back
    pub fn restore_connection(&self) {
        self.shared.connected.store(true, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.shared.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.shared.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_delivers_injected_messages() {
        let mut transport = MockTransport::new();
        let handle = transport.handle();
        let (tx, mut rx) = mpsc::channel(4);
        transport.set_message_sender(tx);
        transport.connect().await.unwrap();

        handle
            .inject_json("/device/A/update", &serde_json::json!({"power": 12}))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "/device/A/update");
        assert_eq!(message.payload, br#"{"power":12}"#.to_vec());
        assert_eq!(handle.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_inject_requires_connection() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let (tx, _rx) = mpsc::channel(4);
        transport.set_message_sender(tx);

        assert!(handle.inject_bytes("/device/A/update", b"{}").await.is_err());
    }

    #[tokio::test]
    async fn test_failing_transport() {
        let mut transport = MockTransport::with_failure();
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.connection_state(),
            ConnectionState::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn test_drop_and_restore_connection() {
        let mut transport = MockTransport::new();
        let handle = transport.handle();
        transport.connect().await.unwrap();

        handle.drop_connection();
        assert!(!transport.is_connected());
        handle.restore_connection();
        assert_eq!(transport.connection_state(), ConnectionState::Connected);

        transport.disconnect().await.unwrap();
        assert_eq!(handle.disconnect_calls(), 1);
    }
}
