//! End-to-end ingestion tests
//!
//! Messages enter through the mock transport and travel the full path:
//! topic matcher, decoder, reconciler, registry, notifier.

mod test_helpers;

use mowerlink::protocol::{FieldName, FieldValue, MowerMode};
use mowerlink::state::{ConnectionStatus, MowerActivity};
use serde_json::json;
use test_helpers::{assert_no_change, at, next_change, started_bridge, test_config, update_topic};

#[tokio::test]
async fn test_first_message_creates_device_and_emits_two_changes() {
    let (mut bridge, handle) = started_bridge(test_config()).await;
    let mut observer = bridge.subscribe();

    handle
        .inject_json_at(
            &update_topic("ABC123"),
            &json!({"battery_percent": 77, "mode": "mowing"}),
            at(100),
        )
        .await
        .unwrap();

    let change_set = next_change(&mut observer).await;
    assert_eq!(change_set.device_id.as_str(), "ABC123");
    assert_eq!(change_set.changed_fields.len(), 2);

    let state = bridge.get("ABC123").expect("device created");
    assert_eq!(
        state.field(FieldName::BatteryPercent),
        Some(&FieldValue::Integer(77))
    );
    assert_eq!(
        state.field(FieldName::Mode),
        Some(&FieldValue::Mode(MowerMode::Mowing))
    );
    assert_eq!(state.connection_status, ConnectionStatus::Online);
    assert_eq!(state.last_message_at, at(100));

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_creates_nothing() {
    let (mut bridge, handle) = started_bridge(test_config()).await;
    let mut observer = bridge.subscribe();

    handle
        .inject_bytes(&update_topic("ABC123"), b"{bad json")
        .await
        .unwrap();

    assert_no_change(&mut observer).await;
    assert!(bridge.get("ABC123").is_none());
    assert!(bridge.list().is_empty());

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unrelated_topic_is_ignored() {
    let (mut bridge, handle) = started_bridge(test_config()).await;
    let mut observer = bridge.subscribe();

    handle
        .inject_json("/zigbee/livingroom/state", &json!({"battery_percent": 40}))
        .await
        .unwrap();
    handle
        .inject_json("/device/ABC123/get", &json!({"cmd": 501}))
        .await
        .unwrap();

    assert_no_change(&mut observer).await;
    assert!(bridge.list().is_empty());

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_decode_error_leaves_existing_state_alone() {
    let (mut bridge, handle) = started_bridge(test_config()).await;
    let mut observer = bridge.subscribe();
    let topic = update_topic("M1");

    handle
        .inject_json_at(&topic, &json!({"power": 55, "mode": 1}), at(10))
        .await
        .unwrap();
    next_change(&mut observer).await;
    let before = bridge.get("M1").unwrap();

    handle.inject_bytes(&topic, br#"{"power": 9"#).await.unwrap();
    handle.inject_bytes(&topic, b"[1, 2, 3]").await.unwrap();
    assert_no_change(&mut observer).await;

    assert_eq!(bridge.get("M1").unwrap(), before);
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_messages_keep_latest_value() {
    let (mut bridge, handle) = started_bridge(test_config()).await;
    let topic = update_topic("M2");

    handle
        .inject_json_at(&topic, &json!({"battery_percent": 80}), at(10))
        .await
        .unwrap();
    handle
        .inject_json_at(&topic, &json!({"battery_percent": 90}), at(5))
        .await
        .unwrap();

    bridge.shutdown().await.unwrap();

    let state = bridge.get("M2").unwrap();
    assert_eq!(
        state.field(FieldName::BatteryPercent),
        Some(&FieldValue::Integer(80))
    );
    assert_eq!(state.last_message_at, at(10));
}

#[tokio::test]
async fn test_replayed_message_emits_nothing() {
    let (mut bridge, handle) = started_bridge(test_config()).await;
    let mut observer = bridge.subscribe();
    let topic = update_topic("M3");
    let payload = json!({"power": 42, "station": true});

    handle.inject_json_at(&topic, &payload, at(50)).await.unwrap();
    next_change(&mut observer).await;

    handle.inject_json_at(&topic, &payload, at(50)).await.unwrap();
    assert_no_change(&mut observer).await;

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_partial_message_leaves_other_fields() {
    let (mut bridge, handle) = started_bridge(test_config()).await;
    let topic = update_topic("M4");

    handle
        .inject_json_at(&topic, &json!({"power": 70, "mode": 0}), at(10))
        .await
        .unwrap();
    handle
        .inject_json_at(&topic, &json!({"mode": 1}), at(20))
        .await
        .unwrap();
    bridge.shutdown().await.unwrap();

    let state = bridge.get("M4").unwrap();
    assert_eq!(
        state.field(FieldName::BatteryPercent),
        Some(&FieldValue::Integer(70))
    );
    assert_eq!(
        state.field_updated_at.get(&FieldName::BatteryPercent),
        Some(&at(10))
    );
    assert_eq!(state.field_updated_at.get(&FieldName::Mode), Some(&at(20)));
}

#[tokio::test]
async fn test_vendor_status_report() {
    let (mut bridge, handle) = started_bridge(test_config()).await;

    handle
        .inject_json_at(
            &update_topic("SS-9000"),
            &json!({
                "cmd": 501,
                "power": "64",
                "mode": 2,
                "station": 1,
                "err_code": 0,
                "wifi_lv": -61,
                "cur_area": 35.5,
                "total_min": 48211,
                "extra_vendor_blob": {"zone": 3}
            }),
            at(1_000),
        )
        .await
        .unwrap();
    bridge.shutdown().await.unwrap();

    let state = bridge.get("SS-9000").unwrap();
    assert_eq!(
        state.field(FieldName::BatteryPercent),
        Some(&FieldValue::Integer(64))
    );
    assert_eq!(
        state.field(FieldName::ResponseCode),
        Some(&FieldValue::Integer(501))
    );
    assert_eq!(
        state.field(FieldName::Docked),
        Some(&FieldValue::Boolean(true))
    );
    assert_eq!(state.activity(), Some(MowerActivity::Docked));
    assert_eq!(
        state.unrecognized.get("extra_vendor_blob"),
        Some(&json!({"zone": 3}))
    );
}

#[tokio::test]
async fn test_devices_are_independent() {
    let (mut bridge, handle) = started_bridge(test_config()).await;

    for (index, id) in ["A", "B", "C"].iter().enumerate() {
        handle
            .inject_json_at(
                &update_topic(id),
                &json!({"power": 10 * (index as i64 + 1)}),
                at(100),
            )
            .await
            .unwrap();
    }
    bridge.shutdown().await.unwrap();

    let ids: Vec<String> = bridge
        .list()
        .into_iter()
        .map(|state| state.id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(
        bridge.get("C").unwrap().field(FieldName::BatteryPercent),
        Some(&FieldValue::Integer(30))
    );
}

#[tokio::test]
async fn test_extra_topic_pattern_routes_to_same_registry() {
    let mut config = test_config();
    config.topics.patterns = vec!["/sunseeker/+/status".to_string()];
    let (mut bridge, handle) = started_bridge(config).await;

    handle
        .inject_json_at("/sunseeker/Z1/status", &json!({"power": 33}), at(1))
        .await
        .unwrap();
    handle
        .inject_json_at(&update_topic("Z1"), &json!({"mode": 1}), at(2))
        .await
        .unwrap();
    bridge.shutdown().await.unwrap();

    let state = bridge.get("Z1").unwrap();
    assert_eq!(state.fields.len(), 2);
}
