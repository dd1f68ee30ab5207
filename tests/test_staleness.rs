//! Offline detection tests
//!
//! Devices go offline after a quiet period and come back on the next message,
//! keeping their last known field values throughout.

mod test_helpers;

use chrono::{Duration as ChronoDuration, Utc};
use mowerlink::notify::ChangeNotifier;
use mowerlink::protocol::{DeviceId, FieldName, FieldValue, PayloadDecoder};
use mowerlink::state::{ConnectionStatus, DeviceRegistry, StalenessSweeper};
use serde_json::json;
use std::time::Duration;
use test_helpers::{at, next_change, started_bridge, test_config, update_topic};

fn seed(registry: &DeviceRegistry, id: &str, secs: i64) {
    let decoded = PayloadDecoder::decode(br#"{"power": 55, "mode": 1}"#).unwrap();
    registry.upsert_and_reconcile(&DeviceId::new(id), &decoded, at(secs));
}

#[test]
fn test_online_before_threshold() {
    let registry = DeviceRegistry::new();
    seed(&registry, "M1", 0);

    let transitions = registry.sweep_stale(at(4 * 60), ChronoDuration::minutes(5));
    assert!(transitions.is_empty());
    assert_eq!(
        registry.get("M1").unwrap().connection_status,
        ConnectionStatus::Online
    );
}

#[test]
fn test_offline_after_threshold_keeps_values() {
    let registry = DeviceRegistry::new();
    seed(&registry, "M1", 0);

    let transitions = registry.sweep_stale(at(6 * 60), ChronoDuration::minutes(5));
    assert_eq!(transitions.len(), 1);

    let change_set = &transitions[0];
    assert!(change_set.changed_fields.is_empty());
    let connection = change_set.connection_change.as_ref().unwrap();
    assert_eq!(connection.old, ConnectionStatus::Online);
    assert_eq!(connection.new, ConnectionStatus::Offline);

    let state = registry.get("M1").unwrap();
    assert_eq!(state.connection_status, ConnectionStatus::Offline);
    assert_eq!(
        state.field(FieldName::BatteryPercent),
        Some(&FieldValue::Integer(55))
    );
}

#[test]
fn test_single_transition_per_quiet_period() {
    let registry = DeviceRegistry::new();
    seed(&registry, "M1", 0);

    assert_eq!(
        registry.sweep_stale(at(6 * 60), ChronoDuration::minutes(5)).len(),
        1
    );
    assert!(registry
        .sweep_stale(at(7 * 60), ChronoDuration::minutes(5))
        .is_empty());
    assert!(registry
        .sweep_stale(at(60 * 60), ChronoDuration::minutes(5))
        .is_empty());
}

#[test]
fn test_message_brings_device_back_online() {
    let registry = DeviceRegistry::new();
    seed(&registry, "M1", 0);
    registry.sweep_stale(at(6 * 60), ChronoDuration::minutes(5));

    // Same values as before; only the connection status moves
    let decoded = PayloadDecoder::decode(br#"{"power": 55}"#).unwrap();
    let change_set = registry.upsert_and_reconcile(&DeviceId::new("M1"), &decoded, at(7 * 60));

    assert!(change_set.changed_fields.is_empty());
    let connection = change_set.connection_change.unwrap();
    assert_eq!(connection.old, ConnectionStatus::Offline);
    assert_eq!(connection.new, ConnectionStatus::Online);
    assert!(registry.get("M1").unwrap().is_online());
}

#[test]
fn test_sweeper_notifies_observers() {
    let registry = DeviceRegistry::new();
    let notifier = ChangeNotifier::new(4);
    let mut observer = notifier.register();

    let quiet_since = Utc::now() - ChronoDuration::minutes(6);
    let decoded = PayloadDecoder::decode(br#"{"power": 20}"#).unwrap();
    registry.upsert_and_reconcile(&DeviceId::new("M9"), &decoded, quiet_since);

    let sweeper = StalenessSweeper::new(
        registry.clone(),
        notifier.clone(),
        Duration::from_secs(300),
        Duration::from_secs(30),
    );
    assert_eq!(sweeper.sweep_once(), 1);
    assert_eq!(sweeper.sweep_once(), 0);

    let change_set = observer.try_recv().unwrap();
    assert_eq!(change_set.device_id.as_str(), "M9");
    assert!(observer.try_recv().is_none());
}

#[tokio::test]
async fn test_bridge_sweeper_runs_in_background() {
    let mut config = test_config();
    config.staleness.threshold_secs = 1;
    config.staleness.sweep_interval_secs = 1;
    let (mut bridge, handle) = started_bridge(config).await;
    let mut observer = bridge.subscribe();

    // Timestamped well in the past, so the first sweep after ingestion flips it
    handle
        .inject_json_at(&update_topic("M5"), &json!({"power": 88}), at(1_000))
        .await
        .unwrap();
    let online = next_change(&mut observer).await;
    assert_eq!(
        online.connection_change.unwrap().new,
        ConnectionStatus::Online
    );

    let offline = tokio::time::timeout(Duration::from_secs(3), observer.recv())
        .await
        .expect("sweeper did not mark the device offline")
        .unwrap();
    assert_eq!(offline.device_id.as_str(), "M5");
    assert_eq!(
        offline.connection_change.unwrap().new,
        ConnectionStatus::Offline
    );

    bridge.shutdown().await.unwrap();
}
