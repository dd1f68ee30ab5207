//! Per-device reconciled state and change-sets

use crate::protocol::{DeviceId, FieldName, FieldValue, MowerMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Connectivity as seen by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Online,
    Offline,
    Unknown,
}

/// Lawn mower activity exposed to the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MowerActivity {
    Mowing,
    Docked,
    Paused,
    Error,
}

/// Static device description for the host's device registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifier: DeviceId,
    pub manufacturer: String,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
}

/// Authoritative reconciled view of one mower
///
/// Every key in `fields` has a matching key in `field_updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub id: DeviceId,
    pub fields: BTreeMap<FieldName, FieldValue>,
    pub field_updated_at: BTreeMap<FieldName, DateTime<Utc>>,
    pub connection_status: ConnectionStatus,
    pub last_message_at: DateTime<Utc>,
    /// Latest value of every vendor key the decoder does not know
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

impl DeviceState {
    /// Empty record for a device seen for the first time
    pub fn new(id: DeviceId, first_seen: DateTime<Utc>) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            field_updated_at: BTreeMap::new(),
            connection_status: ConnectionStatus::Unknown,
            last_message_at: first_seen,
            unrecognized: BTreeMap::new(),
        }
    }

    pub fn field(&self, field: FieldName) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// Value for a sensor entity; explicit nulls read as no value
    pub fn sensor_value(&self, field: FieldName) -> Option<&FieldValue> {
        self.field(field).filter(|value| !value.is_null())
    }

    pub fn is_online(&self) -> bool {
        self.connection_status == ConnectionStatus::Online
    }

    /// Activity derived from the docked flag, error code and mode
    pub fn activity(&self) -> Option<MowerActivity> {
        if self
            .sensor_value(FieldName::Docked)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
        {
            return Some(MowerActivity::Docked);
        }

        if self.sensor_value(FieldName::ErrorCode).is_some_and(is_fault) {
            return Some(MowerActivity::Error);
        }

        let mode = self.sensor_value(FieldName::Mode)?.as_mode()?;
        Some(match mode {
            MowerMode::Mowing | MowerMode::EdgeCutting => MowerActivity::Mowing,
            MowerMode::Returning => MowerActivity::Docked,
            MowerMode::Paused | MowerMode::Other(_) => MowerActivity::Paused,
        })
    }

    pub fn device_info(&self, manufacturer: &str) -> DeviceInfo {
        DeviceInfo {
            identifier: self.id.clone(),
            manufacturer: manufacturer.to_string(),
            model: self.sensor_value(FieldName::Model).map(ToString::to_string),
            firmware_version: self
                .sensor_value(FieldName::FirmwareVersion)
                .map(ToString::to_string),
        }
    }
}

fn is_fault(code: &FieldValue) -> bool {
    match code {
        FieldValue::Integer(code) => *code != 0,
        FieldValue::Text(code) => {
            let code = code.trim();
            !code.is_empty() && code != "0"
        }
        _ => false,
    }
}

/// One field that changed value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: FieldName,
    /// `None` when the field had never been reported
    pub old: Option<FieldValue>,
    pub new: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionChange {
    pub old: ConnectionStatus,
    pub new: ConnectionStatus,
}

/// What one reconciliation (or staleness transition) altered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pub device_id: DeviceId,
    /// In canonical field order
    pub changed_fields: Vec<FieldChange>,
    pub connection_change: Option<ConnectionChange>,
    pub observed_at: DateTime<Utc>,
}

impl ChangeSet {
    pub fn new(device_id: DeviceId, observed_at: DateTime<Utc>) -> Self {
        Self {
            device_id,
            changed_fields: Vec::new(),
            connection_change: None,
            observed_at,
        }
    }

    /// Nothing changed; such change-sets are never delivered
    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty() && self.connection_change.is_none()
    }

    pub fn change_for(&self, field: FieldName) -> Option<&FieldChange> {
        self.changed_fields.iter().find(|change| change.field == field)
    }
}
