//! MQTT client for the vendor telemetry broker
//!
//! The client is split the same way as the rest of the transport layer:
//! pure decision logic in small modules, network I/O in one place.
//!
//! - [`connection`] - connection state, backoff, and rumqttc options
//! - [`message_handler`] - routing rumqttc events and forwarding publishes
//! - [`health_monitor`] - reconnection decisions and session health
//! - [`client`] - the supervisor task that owns the event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use mowerlink::config::{MqttSection, ReconnectSection};
//! use mowerlink::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     host: "localhost".to_string(),
//!     port: 1883,
//!     client_id: "mowerlink".to_string(),
//!     keep_alive_secs: 60,
//!     ignore_retained: false,
//! };
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let mut client = MqttClient::new(
//!     "mowerlink-example",
//!     config,
//!     &ReconnectSection::default(),
//!     vec!["/device/+/update".to_string()],
//! )?;
//! client.set_message_sender(tx);
//! client.connect().await?;
//!
//! while let Some(message) = rx.recv().await {
//!     println!("{} -> {} bytes", message.topic, message.payload.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
