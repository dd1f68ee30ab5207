//! Field-level reconciliation rules
//!
//! Pure functions over [`DeviceState`]. A field is overwritten only when the
//! incoming message is at least as recent as the stored update for that field,
//! which makes replays and late arrivals harmless. Ordering is by the time the
//! bridge received the message; the vendor's own timestamp is stored as a
//! regular field and never trusted for ordering.

use super::device::{ChangeSet, ConnectionChange, ConnectionStatus, DeviceState, FieldChange};
use crate::protocol::DecodedTelemetry;
use chrono::{DateTime, Duration, Utc};

/// Merge one decoded message into `state` and describe what changed
pub fn reconcile(
    state: &mut DeviceState,
    decoded: &DecodedTelemetry,
    received_at: DateTime<Utc>,
) -> ChangeSet {
    let mut change_set = ChangeSet::new(state.id.clone(), received_at);

    for (field, incoming) in &decoded.fields {
        let is_newer = state
            .field_updated_at
            .get(field)
            .map_or(true, |updated_at| received_at >= *updated_at);
        if !is_newer {
            continue;
        }

        let previous = state.fields.insert(*field, incoming.clone());
        state.field_updated_at.insert(*field, received_at);

        if previous.as_ref() != Some(incoming) {
            change_set.changed_fields.push(FieldChange {
                field: *field,
                old: previous,
                new: incoming.clone(),
            });
        }
    }

    // Unknown keys carry no timestamps of their own; they follow the message clock
    if received_at >= state.last_message_at || state.unrecognized.is_empty() {
        for (key, value) in &decoded.unrecognized {
            state.unrecognized.insert(key.clone(), value.clone());
        }
    }

    if state.connection_status != ConnectionStatus::Online {
        change_set.connection_change = Some(ConnectionChange {
            old: state.connection_status,
            new: ConnectionStatus::Online,
        });
        state.connection_status = ConnectionStatus::Online;
    }

    state.last_message_at = state.last_message_at.max(received_at);

    change_set
}

/// Mark the device offline once it has been silent for longer than `threshold`
///
/// Returns `None` when nothing changes.
pub fn apply_staleness(
    state: &mut DeviceState,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Option<ChangeSet> {
    if state.connection_status == ConnectionStatus::Offline {
        return None;
    }
    if now - state.last_message_at <= threshold {
        return None;
    }

    let mut change_set = ChangeSet::new(state.id.clone(), now);
    change_set.connection_change = Some(ConnectionChange {
        old: state.connection_status,
        new: ConnectionStatus::Offline,
    });
    state.connection_status = ConnectionStatus::Offline;
    Some(change_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeviceId, FieldName, FieldValue, MowerMode, PayloadDecoder};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn battery(value: i64) -> DecodedTelemetry {
        DecodedTelemetry::default().with_field(FieldName::BatteryPercent, FieldValue::Integer(value))
    }

    fn fresh_state() -> DeviceState {
        DeviceState::new(DeviceId::new("ABC123"), at(0))
    }

    #[test]
    fn test_first_message_populates_state() {
        let mut state = fresh_state();
        let decoded =
            PayloadDecoder::decode(br#"{"battery_percent": 77, "mode": "mowing"}"#).unwrap();

        let change_set = reconcile(&mut state, &decoded, at(100));

        assert_eq!(change_set.changed_fields.len(), 2);
        assert_eq!(
            change_set.change_for(FieldName::BatteryPercent),
            Some(&FieldChange {
                field: FieldName::BatteryPercent,
                old: None,
                new: FieldValue::Integer(77),
            })
        );
        assert_eq!(
            change_set.connection_change,
            Some(ConnectionChange {
                old: ConnectionStatus::Unknown,
                new: ConnectionStatus::Online,
            })
        );
        assert_eq!(
            state.field(FieldName::Mode),
            Some(&FieldValue::Mode(MowerMode::Mowing))
        );
        assert_eq!(state.connection_status, ConnectionStatus::Online);
        assert_eq!(state.last_message_at, at(100));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut state = fresh_state();
        let decoded = battery(80);

        reconcile(&mut state, &decoded, at(10));
        let after_first = state.clone();
        let second = reconcile(&mut state, &decoded, at(10));

        assert!(second.is_empty());
        assert_eq!(state, after_first);
    }

    #[test]
    fn test_older_message_does_not_clobber() {
        let mut state = fresh_state();
        reconcile(&mut state, &battery(80), at(10));
        let late = reconcile(&mut state, &battery(90), at(5));

        assert!(late.is_empty());
        assert_eq!(state.field(FieldName::BatteryPercent), Some(&FieldValue::Integer(80)));
        assert_eq!(state.field_updated_at[&FieldName::BatteryPercent], at(10));
        assert_eq!(state.last_message_at, at(10));
    }

    #[test]
    fn test_later_message_wins_in_order() {
        let mut state = fresh_state();
        reconcile(&mut state, &battery(90), at(5));
        let change_set = reconcile(&mut state, &battery(80), at(10));

        assert_eq!(state.field(FieldName::BatteryPercent), Some(&FieldValue::Integer(80)));
        assert_eq!(
            change_set.changed_fields,
            vec![FieldChange {
                field: FieldName::BatteryPercent,
                old: Some(FieldValue::Integer(90)),
                new: FieldValue::Integer(80),
            }]
        );
    }

    #[test]
    fn test_fields_are_independent() {
        let mut state = fresh_state();
        reconcile(&mut state, &battery(80), at(10));

        let mode_only = DecodedTelemetry::default()
            .with_field(FieldName::Mode, FieldValue::Mode(MowerMode::Paused));
        reconcile(&mut state, &mode_only, at(20));

        assert_eq!(state.field(FieldName::BatteryPercent), Some(&FieldValue::Integer(80)));
        assert_eq!(state.field_updated_at[&FieldName::BatteryPercent], at(10));
        assert_eq!(state.field_updated_at[&FieldName::Mode], at(20));
    }

    #[test]
    fn test_older_message_can_fill_absent_field() {
        let mut state = fresh_state();
        reconcile(&mut state, &battery(80), at(10));

        let late_mode = DecodedTelemetry::default()
            .with_field(FieldName::Mode, FieldValue::Mode(MowerMode::Mowing));
        let change_set = reconcile(&mut state, &late_mode, at(5));

        assert_eq!(change_set.changed_fields.len(), 1);
        assert_eq!(state.field_updated_at[&FieldName::Mode], at(5));
        assert_eq!(state.last_message_at, at(10));
    }

    #[test]
    fn test_explicit_null_clears_value() {
        let mut state = fresh_state();
        let fault = DecodedTelemetry::default()
            .with_field(FieldName::ErrorCode, FieldValue::Integer(12));
        reconcile(&mut state, &fault, at(10));

        let cleared =
            DecodedTelemetry::default().with_field(FieldName::ErrorCode, FieldValue::Null);
        let change_set = reconcile(&mut state, &cleared, at(20));

        assert_eq!(state.field(FieldName::ErrorCode), Some(&FieldValue::Null));
        assert_eq!(
            change_set.change_for(FieldName::ErrorCode).map(|c| &c.new),
            Some(&FieldValue::Null)
        );
    }

    #[test]
    fn test_same_value_refreshes_timestamp() {
        let mut state = fresh_state();
        reconcile(&mut state, &battery(80), at(10));
        let change_set = reconcile(&mut state, &battery(80), at(30));

        assert!(change_set.is_empty());
        assert_eq!(state.field_updated_at[&FieldName::BatteryPercent], at(30));
        assert_eq!(state.last_message_at, at(30));
    }

    #[test]
    fn test_unrecognized_fields_kept() {
        let mut state = fresh_state();
        let decoded = PayloadDecoder::decode(br#"{"foo": "bar"}"#).unwrap();
        let change_set = reconcile(&mut state, &decoded, at(10));

        assert!(change_set.changed_fields.is_empty());
        assert_eq!(state.unrecognized.get("foo"), Some(&serde_json::json!("bar")));
    }

    #[test]
    fn test_staleness_transition() {
        let threshold = Duration::minutes(5);
        let mut state = fresh_state();
        reconcile(&mut state, &battery(80), at(0));

        assert!(apply_staleness(&mut state, at(4 * 60), threshold).is_none());
        assert_eq!(state.connection_status, ConnectionStatus::Online);

        let change_set = apply_staleness(&mut state, at(6 * 60), threshold).unwrap();
        assert!(change_set.changed_fields.is_empty());
        assert_eq!(
            change_set.connection_change,
            Some(ConnectionChange {
                old: ConnectionStatus::Online,
                new: ConnectionStatus::Offline,
            })
        );
        assert_eq!(state.connection_status, ConnectionStatus::Offline);

        // Already offline: nothing more to report
        assert!(apply_staleness(&mut state, at(7 * 60), threshold).is_none());
        // Last known values survive
        assert_eq!(state.field(FieldName::BatteryPercent), Some(&FieldValue::Integer(80)));
    }

    #[test]
    fn test_message_after_staleness_brings_device_back() {
        let threshold = Duration::minutes(5);
        let mut state = fresh_state();
        reconcile(&mut state, &battery(80), at(0));
        apply_staleness(&mut state, at(600), threshold);

        let change_set = reconcile(&mut state, &battery(80), at(700));
        assert!(change_set.changed_fields.is_empty());
        assert_eq!(
            change_set.connection_change,
            Some(ConnectionChange {
                old: ConnectionStatus::Offline,
                new: ConnectionStatus::Online,
            })
        );
    }

    proptest! {
        #[test]
        fn final_value_independent_of_arrival_order(
            updates in prop::collection::vec((0i64..1000, 0i64..=100), 1..20)
        ) {
            let mut forward = fresh_state();
            for (secs, value) in &updates {
                reconcile(&mut forward, &battery(*value), at(*secs));
            }

            let mut backward = fresh_state();
            for (secs, value) in updates.iter().rev() {
                reconcile(&mut backward, &battery(*value), at(*secs));
            }

            // Newest timestamp wins; ties resolve to the last applied, so compare timestamps only
            let newest = updates.iter().map(|(secs, _)| *secs).max().unwrap();
            prop_assert_eq!(forward.field_updated_at[&FieldName::BatteryPercent], at(newest));
            prop_assert_eq!(backward.field_updated_at[&FieldName::BatteryPercent], at(newest));
            prop_assert_eq!(forward.last_message_at, backward.last_message_at);
        }

        #[test]
        fn distinct_timestamps_converge(
            updates in prop::collection::btree_map(0i64..1000, 0i64..=100, 1..20)
        ) {
            let mut updates: Vec<(i64, i64)> = updates.into_iter().collect();
            let mut sorted = fresh_state();
            for (secs, value) in &updates {
                reconcile(&mut sorted, &battery(*value), at(*secs));
            }

            updates.reverse();
            let mut reversed = fresh_state();
            for (secs, value) in &updates {
                reconcile(&mut reversed, &battery(*value), at(*secs));
            }

            prop_assert_eq!(sorted.fields, reversed.fields);
        }

        #[test]
        fn replay_never_changes_anything(value in 0i64..=100, secs in 0i64..1000) {
            let mut state = fresh_state();
            reconcile(&mut state, &battery(value), at(secs));
            let snapshot = state.clone();
            let replay = reconcile(&mut state, &battery(value), at(secs));
            prop_assert!(replay.is_empty());
            prop_assert_eq!(state, snapshot);
        }
    }
}
