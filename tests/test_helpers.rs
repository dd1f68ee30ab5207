//! Test helpers and utilities for integration tests

use chrono::{DateTime, TimeZone, Utc};
use mowerlink::config::BridgeConfig;
use mowerlink::notify::ChangeSubscription;
use mowerlink::state::ChangeSet;
use mowerlink::testing::{MockTransport, MockTransportHandle};
use mowerlink::Bridge;
use std::time::Duration;

/// Silence threshold long enough that epoch-based test timestamps never go stale
#[allow(dead_code)]
pub const NEVER_STALE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Bridge configuration with the status server disabled
#[allow(dead_code)]
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::for_broker("localhost", 1883);
    config.health.enabled = false;
    config.staleness.threshold_secs = NEVER_STALE_SECS;
    config
}

/// Started bridge over a mock transport, plus the handle to feed it
#[allow(dead_code)]
pub async fn started_bridge(config: BridgeConfig) -> (Bridge<MockTransport>, MockTransportHandle) {
    let transport = MockTransport::new();
    let handle = transport.handle();
    let mut bridge = Bridge::new(config, transport).expect("valid test config");
    bridge.start().await.expect("mock bridge starts");
    (bridge, handle)
}

/// Vendor update topic for `device_id`
#[allow(dead_code)]
pub fn update_topic(device_id: &str) -> String {
    format!("/device/{device_id}/update")
}

/// Fixed instant `secs` seconds after the epoch
#[allow(dead_code)]
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Next change-set, failing the test after one second
#[allow(dead_code)]
pub async fn next_change(subscription: &mut ChangeSubscription) -> ChangeSet {
    tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("timed out waiting for a change-set")
        .expect("notifier closed")
}

/// Assert that no change-set arrives within a short window
#[allow(dead_code)]
pub async fn assert_no_change(subscription: &mut ChangeSubscription) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await;
    assert!(outcome.is_err(), "unexpected change-set: {outcome:?}");
}
