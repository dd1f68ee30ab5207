//! mowerlink - MQTT telemetry bridge for robot lawn mowers
//!
//! Subscribes to the status topics a white-labeled mower firmware publishes on
//! a local broker, reconciles the loosely-typed JSON into one normalized state
//! record per device, and hands change-sets to the host platform.
//!
//! # Overview
//!
//! - [`protocol`] - topic matching, payload decoding, typed telemetry
//! - [`state`] - per-device state, reconciliation rules, staleness sweep
//! - [`notify`] - non-blocking change-set fan-out
//! - [`transport`] - the MQTT connection manager behind a `Transport` trait
//! - [`ingest`] and [`bridge`] - wiring and lifecycle
//!
//! # Quick Start
//!
//! ```rust
//! use mowerlink::protocol::{FieldName, FieldValue, PayloadDecoder, TopicMatcher};
//! use mowerlink::state::{ConnectionStatus, DeviceRegistry};
//! use chrono::Utc;
//!
//! let matcher = TopicMatcher::from_prefix("device", &[]).unwrap();
//! let matched = matcher.match_topic("/device/ABC123/update").unwrap();
//!
//! let decoded = PayloadDecoder::decode(br#"{"power": 77, "mode": 1, "foo": "bar"}"#).unwrap();
//! assert!(decoded.unrecognized_field("foo").is_some());
//!
//! let registry = DeviceRegistry::new();
//! let changes = registry.upsert_and_reconcile(&matched.device_id, &decoded, Utc::now());
//! assert_eq!(changes.changed_fields.len(), 2);
//!
//! let state = registry.get("ABC123").unwrap();
//! assert_eq!(state.field(FieldName::BatteryPercent), Some(&FieldValue::Integer(77)));
//! assert_eq!(state.connection_status, ConnectionStatus::Online);
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod ingest;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod state;
pub mod testing;
pub mod transport;

pub use bridge::Bridge;
pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, BridgeResult};
pub use ingest::{IngestOutcome, IngestPipeline};
pub use notify::{ChangeNotifier, ChangeSubscription};
pub use state::{ChangeSet, ConnectionStatus, DeviceRegistry, DeviceState};
pub use transport::mqtt::MqttClient;
