//! Pure message routing for MQTT events
//!
//! Turns rumqttc events into routing decisions and hands accepted publishes
//! to the ingest pipeline as [`RawMessage`]s.

use crate::protocol::RawMessage;
use chrono::Utc;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failures: suback
                        .return_codes
                        .iter()
                        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                        .count(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Whether a publish should reach the ingest pipeline
    pub fn should_forward(retain: bool, ignore_retained: bool) -> bool {
        !(retain && ignore_retained)
    }

    /// Stamp an accepted publish with its arrival time
    pub fn build_raw_message(topic: String, payload: Vec<u8>, retain: bool) -> RawMessage {
        RawMessage {
            topic,
            payload,
            received_at: Utc::now(),
            retain,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection; subscriptions must be (re)issued
    ConnectionAcknowledged { session_present: bool },
    /// Publish on one of our filters
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Broker closed the session
    Disconnected,
    /// SubAck with the number of rejected filters
    SubscriptionConfirmed { packet_id: u16, failures: usize },
    /// Our own DISCONNECT left the client
    DisconnectSent,
    /// PingResp, UnsubAck and friends
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Hands accepted messages to the ingest pipeline
///
/// The sender can be installed after the client is built, so it sits behind a
/// shared lock.
#[derive(Clone, Default)]
pub struct MessageForwarder {
    sender: Arc<RwLock<Option<mpsc::Sender<RawMessage>>>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sender(&self, sender: mpsc::Sender<RawMessage>) {
        *self.sender.write().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    /// Forward a message, waiting for room in the pipeline queue
    pub async fn forward(&self, message: RawMessage) -> Result<(), String> {
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match sender {
            Some(sender) => {
                debug!(topic = %message.topic, "Forwarding message to ingest pipeline");
                sender
                    .send(message)
                    .await
                    .map_err(|e| format!("Ingest pipeline closed: {e}"))
            }
            None => {
                warn!(topic = %message.topic, "No ingest pipeline configured - message dropped");
                Err("No message sender configured".to_string())
            }
        }
    }
}
