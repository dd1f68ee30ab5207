//! Device registry
//!
//! Maps device identifiers to their reconciled state. The outer map lock is held
//! only long enough to find or create a device slot; each slot has its own mutex,
//! so two messages for the same mower reconcile one after the other while
//! different mowers reconcile in parallel.

use super::device::{ChangeSet, DeviceState};
use super::reconciler;
use crate::protocol::{DecodedTelemetry, DeviceId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

type DeviceSlot = Arc<Mutex<DeviceState>>;

/// Thread-safe registry of known devices
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceId, DeviceSlot>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one device
    pub fn get(&self, id: &str) -> Option<DeviceState> {
        let slot = {
            let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
            devices.get(id).cloned()
        }?;
        let state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(state.clone())
    }

    /// Snapshots of every known device, ordered by identifier
    pub fn list(&self) -> Vec<DeviceState> {
        let mut states: Vec<DeviceState> = self
            .slots()
            .into_iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    pub fn device_count(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Reconcile a decoded message into the device's state, creating it on first sight
    ///
    /// The merge runs on a copy that replaces the stored state in one step, so
    /// readers never see a half-applied message.
    pub fn upsert_and_reconcile(
        &self,
        id: &DeviceId,
        decoded: &DecodedTelemetry,
        received_at: DateTime<Utc>,
    ) -> ChangeSet {
        self.upsert_and_reconcile_with(id, decoded, received_at, |_| {})
    }

    /// Like [`DeviceRegistry::upsert_and_reconcile`], calling `publish` before
    /// the device lock is released
    ///
    /// Change-sets published this way reach observers in the same order as the
    /// state transitions they describe. `publish` must not block or touch the
    /// registry.
    pub fn upsert_and_reconcile_with<F>(
        &self,
        id: &DeviceId,
        decoded: &DecodedTelemetry,
        received_at: DateTime<Utc>,
        publish: F,
    ) -> ChangeSet
    where
        F: FnOnce(&ChangeSet),
    {
        let slot = self.slot_for(id, received_at);
        let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = state.clone();
        let change_set = reconciler::reconcile(&mut next, decoded, received_at);
        *state = next;
        publish(&change_set);

        debug!(
            device_id = %id,
            changed_fields = change_set.changed_fields.len(),
            "Reconciled telemetry"
        );
        change_set
    }

    /// Mark silent devices offline, returning one change-set per transition
    pub fn sweep_stale(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<ChangeSet> {
        self.sweep_stale_with(now, threshold, |_| {})
    }

    /// Like [`DeviceRegistry::sweep_stale`], calling `publish` for each
    /// transition while that device is still locked
    pub fn sweep_stale_with<F>(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        mut publish: F,
    ) -> Vec<ChangeSet>
    where
        F: FnMut(&ChangeSet),
    {
        let mut transitions = Vec::new();
        for slot in self.slots() {
            let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(change_set) = reconciler::apply_staleness(&mut state, now, threshold) {
                publish(&change_set);
                info!(
                    device_id = %state.id,
                    last_message_at = %state.last_message_at,
                    "Device went offline"
                );
                transitions.push(change_set);
            }
        }
        transitions.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        transitions
    }

    fn slots(&self) -> Vec<DeviceSlot> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn slot_for(&self, id: &DeviceId, first_seen: DateTime<Utc>) -> DeviceSlot {
        if let Some(slot) = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Arc::clone(slot);
        }

        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(devices.entry(id.clone()).or_insert_with(|| {
            info!(device_id = %id, "Registered new device");
            Arc::new(Mutex::new(DeviceState::new(id.clone(), first_seen)))
        }))
    }
}
